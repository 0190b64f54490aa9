use crate::blog::{QueryPresets, SimulatedSourceConfig};
use crate::pagination::PaginationConfig;
use crate::query::{CacheConfig, QueryOptions, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Application configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory for the settings database and log files
    pub data_dir: PathBuf,

    /// Initial page size of the post list
    pub default_page_size: usize,

    /// Page sizes offered in the list view
    pub page_sizes: Vec<usize>,

    /// Page buttons shown before the window collapses into ellipses
    pub max_visible_pages: usize,

    /// Freshness and retention of post list queries, in seconds
    pub posts_stale_secs: u64,
    pub posts_gc_secs: u64,

    /// Freshness and retention of single post queries, in seconds
    pub post_stale_secs: u64,
    pub post_gc_secs: u64,

    /// Freshness and retention of tag and author lists, in seconds
    pub static_stale_secs: u64,
    pub static_gc_secs: u64,

    /// Retries after a failed fetch
    pub retry_count: u32,

    /// Retries after a failed tag or author fetch
    pub static_retry_count: u32,

    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,

    /// Period of the cache garbage collector, in seconds
    pub gc_interval_secs: u64,

    pub max_cache_entries: usize,

    /// Warm the cache for the next page after each successful load
    pub prefetch_next_page: bool,

    /// Number of posts in the simulated catalog
    pub catalog_size: usize,

    pub latency_min_ms: u64,
    pub latency_max_ms: u64,

    /// Probability that a simulated request fails
    pub failure_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_dir()
                .map(|dir| dir.join("folio"))
                .unwrap_or_else(|| PathBuf::from("./data")),
            default_page_size: 10,
            page_sizes: vec![5, 10, 20, 50],
            max_visible_pages: 10,
            posts_stale_secs: 5 * 60,
            posts_gc_secs: 10 * 60,
            post_stale_secs: 10 * 60,
            post_gc_secs: 15 * 60,
            static_stale_secs: 30 * 60,
            static_gc_secs: 60 * 60,
            retry_count: 3,
            static_retry_count: 2,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            gc_interval_secs: 60,
            max_cache_entries: 500,
            prefetch_next_page: true,
            catalog_size: 47,
            latency_min_ms: 150,
            latency_max_ms: 450,
            failure_rate: 0.0,
        }
    }
}

impl Config {
    /// Build the configuration: defaults, then a config file, then `FOLIO_*`
    /// environment variables. An explicit `path` must exist.
    pub async fn init(path: Option<&Path>) -> Result<Self> {
        debug!("Initializing configuration");

        let mut config = match path {
            Some(path) => Self::load_from_path(path).await?,
            None => Self::load_from_file().await?.unwrap_or_default(),
        };

        config.load_from_env();
        config.validate()?;
        Ok(config)
    }

    /// Load the first configuration file found:
    /// 1. ./.folio.json
    /// 2. ./folio.json
    /// 3. $CONFIG_DIR/folio/folio.json
    pub async fn load_from_file() -> Result<Option<Self>> {
        let mut config_paths = vec![PathBuf::from("./.folio.json"), PathBuf::from("./folio.json")];

        if let Some(config_dir) = dirs::config_dir() {
            config_paths.push(config_dir.join("folio").join("folio.json"));
        }

        for path in config_paths {
            if path.exists() {
                return Self::load_from_path(&path).await.map(Some);
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("Loading configuration from: {}", path.display());
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply overrides from the process environment
    pub fn load_from_env(&mut self) {
        self.apply_env(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FOLIO_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Some(sizes) = lookup("FOLIO_PAGE_SIZES") {
            match sizes
                .split(',')
                .map(|s| s.trim().parse::<usize>())
                .collect::<Result<Vec<_>, _>>()
            {
                Ok(parsed) => self.page_sizes = parsed,
                Err(err) => warn!("Ignoring FOLIO_PAGE_SIZES={}: {}", sizes, err),
            }
        }

        override_from(&lookup, "FOLIO_PAGE_SIZE", &mut self.default_page_size);
        override_from(&lookup, "FOLIO_MAX_VISIBLE_PAGES", &mut self.max_visible_pages);
        override_from(&lookup, "FOLIO_POSTS_STALE_SECS", &mut self.posts_stale_secs);
        override_from(&lookup, "FOLIO_POSTS_GC_SECS", &mut self.posts_gc_secs);
        override_from(&lookup, "FOLIO_POST_STALE_SECS", &mut self.post_stale_secs);
        override_from(&lookup, "FOLIO_POST_GC_SECS", &mut self.post_gc_secs);
        override_from(&lookup, "FOLIO_STATIC_STALE_SECS", &mut self.static_stale_secs);
        override_from(&lookup, "FOLIO_STATIC_GC_SECS", &mut self.static_gc_secs);
        override_from(&lookup, "FOLIO_RETRY_COUNT", &mut self.retry_count);
        override_from(&lookup, "FOLIO_STATIC_RETRY_COUNT", &mut self.static_retry_count);
        override_from(&lookup, "FOLIO_RETRY_BASE_DELAY_MS", &mut self.retry_base_delay_ms);
        override_from(&lookup, "FOLIO_RETRY_MAX_DELAY_MS", &mut self.retry_max_delay_ms);
        override_from(&lookup, "FOLIO_GC_INTERVAL_SECS", &mut self.gc_interval_secs);
        override_from(&lookup, "FOLIO_MAX_CACHE_ENTRIES", &mut self.max_cache_entries);
        override_from(&lookup, "FOLIO_PREFETCH", &mut self.prefetch_next_page);
        override_from(&lookup, "FOLIO_CATALOG_SIZE", &mut self.catalog_size);
        override_from(&lookup, "FOLIO_LATENCY_MIN_MS", &mut self.latency_min_ms);
        override_from(&lookup, "FOLIO_LATENCY_MAX_MS", &mut self.latency_max_ms);
        override_from(&lookup, "FOLIO_FAILURE_RATE", &mut self.failure_rate);
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_page_size == 0 {
            return Err(anyhow::anyhow!("default_page_size must be greater than 0"));
        }
        if self.page_sizes.iter().any(|&size| size == 0) {
            return Err(anyhow::anyhow!("page_sizes must not contain 0"));
        }
        if self.max_visible_pages == 0 {
            return Err(anyhow::anyhow!("max_visible_pages must be greater than 0"));
        }
        if !(0.0..=1.0).contains(&self.failure_rate) {
            return Err(anyhow::anyhow!("failure_rate must be between 0.0 and 1.0"));
        }
        if self.latency_min_ms > self.latency_max_ms {
            return Err(anyhow::anyhow!("latency_min_ms must not exceed latency_max_ms"));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(anyhow::anyhow!("retry_base_delay_ms must not exceed retry_max_delay_ms"));
        }
        if self.gc_interval_secs == 0 {
            return Err(anyhow::anyhow!("gc_interval_secs must be greater than 0"));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("folio.db")
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join("folio.log")
    }

    pub fn pagination_config(&self) -> PaginationConfig {
        let mut available_page_sizes = self.page_sizes.clone();
        if !available_page_sizes.contains(&self.default_page_size) {
            available_page_sizes.push(self.default_page_size);
            available_page_sizes.sort_unstable();
        }
        PaginationConfig {
            default_page_size: self.default_page_size,
            available_page_sizes,
            max_visible_pages: self.max_visible_pages,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry_count,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
        )
    }

    pub fn query_presets(&self) -> QueryPresets {
        let retry = self.retry_policy();
        let options = |stale: u64, gc: u64, retry: RetryPolicy| {
            QueryOptions::default()
                .with_stale_time(Duration::from_secs(stale))
                .with_gc_time(Duration::from_secs(gc))
                .with_retry(retry)
        };

        QueryPresets {
            posts: options(self.posts_stale_secs, self.posts_gc_secs, retry.clone()),
            post: options(self.post_stale_secs, self.post_gc_secs, retry.clone()),
            static_data: options(
                self.static_stale_secs,
                self.static_gc_secs,
                RetryPolicy {
                    retries: self.static_retry_count,
                    ..retry
                },
            ),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_cache_entries,
            gc_interval: Duration::from_secs(self.gc_interval_secs),
        }
    }

    pub fn source_config(&self) -> SimulatedSourceConfig {
        SimulatedSourceConfig {
            catalog_size: self.catalog_size,
            min_latency: Duration::from_millis(self.latency_min_ms),
            max_latency: Duration::from_millis(self.latency_max_ms),
            failure_rate: self.failure_rate,
        }
    }
}

fn override_from<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, target: &mut T)
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        match raw.trim().parse() {
            Ok(value) => *target = value,
            Err(err) => warn!("Ignoring {}={}: {}", name, raw, err),
        }
    }
}
