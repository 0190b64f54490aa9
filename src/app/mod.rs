//! Application wiring: configuration, data source, cache and preferences

use crate::blog::{BlogService, BlogSource, ListController, SimulatedBlogSource};
use crate::config::Config;
use crate::query::QueryCache;
use crate::storage::{KeyValueStore, SqliteStore, ThemePreference};
use crate::tui;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Main application state shared by the CLI commands and the TUI
pub struct App {
    config: Config,
    cache: QueryCache,
    service: BlogService,
    theme: ThemePreference,
}

impl App {
    /// Build the application from configuration. Must run inside a tokio runtime.
    pub async fn new(config: Config) -> Result<Self> {
        let source = Arc::new(SimulatedBlogSource::new(config.source_config()));

        let store = SqliteStore::open(config.database_path())
            .context("Failed to open the settings database")?;

        let app = Self::with_parts(config, source, Arc::new(store));
        app.cache.start_gc();
        info!("Application initialized");
        Ok(app)
    }

    /// Build the application around an explicit source and store
    pub fn with_parts(
        config: Config,
        source: Arc<dyn BlogSource>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let cache = QueryCache::new(config.cache_config());
        let service = BlogService::new(source, cache.clone(), config.query_presets());
        let theme = ThemePreference::load(store);

        Self {
            config,
            cache,
            service,
            theme,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn service(&self) -> &BlogService {
        &self.service
    }

    pub fn theme(&self) -> &ThemePreference {
        &self.theme
    }

    /// A list controller sharing this application's cache
    pub fn list_controller(&self) -> ListController {
        ListController::new(self.service.clone(), self.config.pagination_config())
    }

    /// Run the interactive browser until the user quits
    pub async fn run_interactive(&mut self) -> Result<()> {
        info!("Starting interactive session");
        tui::run(self).await
    }

    /// Stop the cache sweeper and drop every cached entry
    pub fn shutdown(&self) {
        let stats = self.cache.stats();
        debug!(
            "Cache at shutdown: {} entries, {} fetches, hit rate {:.2}",
            stats.entries,
            stats.fetches,
            stats.hit_rate()
        );
        self.cache.dispose();
    }
}
