//! Keyed query cache with staleness tracking, request de-duplication,
//! background refetch and garbage collection of unobserved entries

use super::errors::FetchError;
use super::key::QueryKey;
use super::observer::{downcast, QueryState, QuerySubscription};
use super::options::{run_with_retry, QueryOptions};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Serialize;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Type-erased cached value
pub type QueryData = Arc<dyn Any + Send + Sync>;

type FetchOutcome = Result<QueryData, FetchError>;
type SharedFetch = Shared<BoxFuture<'static, FetchOutcome>>;
type ErasedFetcher = Arc<dyn Fn() -> BoxFuture<'static, FetchOutcome> + Send + Sync>;

/// A caller's fetcher together with the value type it produces
struct Registration<'a> {
    fetcher: ErasedFetcher,
    value_type: TypeId,
    options: &'a QueryOptions,
}

/// Whether a fetch is running for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Idle,
    Fetching,
    Error,
}

/// Cache-wide settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on entries; unobserved entries are evicted oldest-first beyond it
    pub max_entries: usize,

    /// Period of the background collector started by [`QueryCache::start_gc`]
    pub gc_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            gc_interval: Duration::from_secs(60),
        }
    }
}

/// Counters for cache behaviour
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub deduplicated: u64,
    pub fetches: u64,
    pub failures: u64,
    pub collected: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// What observers see of an entry
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub(crate) data: Option<QueryData>,
    pub(crate) error: Option<FetchError>,
    pub(crate) fetch_status: FetchStatus,
    pub(crate) stale_after: Option<Instant>,
    pub(crate) updated_at: Option<DateTime<Utc>>,
}

struct CacheEntry {
    data: Option<QueryData>,
    error: Option<FetchError>,
    fetch_status: FetchStatus,
    /// `None` with data present means the data never goes stale
    stale_after: Option<Instant>,
    updated_at: Option<DateTime<Utc>>,
    last_fetched_at: Option<Instant>,
    gc_time: Duration,
    observers: usize,
    inactive_since: Option<Instant>,
    in_flight: Option<SharedFetch>,
    /// Set when an invalidation lands while a fetch is running
    invalidated_in_flight: bool,
    generation: u64,
    /// Type of the cached value, fixed by the first registration
    value_type: Option<TypeId>,
    fetcher: Option<ErasedFetcher>,
    options: QueryOptions,
    notifier: watch::Sender<Snapshot>,
}

impl CacheEntry {
    fn new(options: &QueryOptions, now: Instant) -> Self {
        let (notifier, _) = watch::channel(Snapshot {
            data: None,
            error: None,
            fetch_status: FetchStatus::Idle,
            stale_after: None,
            updated_at: None,
        });

        Self {
            data: None,
            error: None,
            fetch_status: FetchStatus::Idle,
            stale_after: None,
            updated_at: None,
            last_fetched_at: None,
            gc_time: options.gc_time,
            observers: 0,
            inactive_since: Some(now),
            in_flight: None,
            invalidated_in_flight: false,
            generation: 0,
            value_type: None,
            fetcher: None,
            options: options.clone(),
            notifier,
        }
    }

    fn is_fresh(&self, now: Instant) -> bool {
        self.data.is_some() && self.stale_after.map_or(true, |deadline| now < deadline)
    }

    fn is_collectable(&self, now: Instant) -> bool {
        self.observers == 0
            && self.in_flight.is_none()
            && self
                .inactive_since
                .map_or(false, |since| now.saturating_duration_since(since) >= self.gc_time)
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            data: self.data.clone(),
            error: self.error.clone(),
            fetch_status: self.fetch_status,
            stale_after: self.stale_after,
            updated_at: self.updated_at,
        }
    }

    fn publish(&self) {
        self.notifier.send_replace(self.snapshot());
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<QueryKey, CacheEntry>,
    stats: CacheStats,
}

enum Acquired {
    Fresh(QueryData),
    Pending(SharedFetch),
}

pub(crate) struct CacheInner {
    state: Mutex<CacheState>,
    config: CacheConfig,
    /// Fetch generations rise across the whole cache, so a fetch orphaned by
    /// entry removal can never match a later entry under the same key
    next_generation: AtomicU64,
    gc_task: Mutex<Option<JoinHandle<()>>>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn release_observer(&self, key: &QueryKey) {
        let mut state = self.lock();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.observers = entry.observers.saturating_sub(1);
            if entry.observers == 0 {
                entry.inactive_since = Some(Instant::now());
                trace!("Last observer detached from {}", key);
            }
        }
    }

    /// Store the outcome of fetch `generation`; outcomes of superseded fetches are dropped
    fn settle(&self, key: &QueryKey, generation: u64, outcome: &FetchOutcome, stale_time: Duration) {
        let mut state = self.lock();
        let CacheState { entries, stats } = &mut *state;

        let Some(entry) = entries.get_mut(key) else {
            trace!("Discarding result for removed entry {}", key);
            return;
        };
        if entry.generation != generation {
            trace!("Discarding superseded result for {}", key);
            return;
        }

        let now = Instant::now();
        entry.in_flight = None;

        match outcome {
            Ok(data) => {
                entry.data = Some(Arc::clone(data));
                entry.error = None;
                entry.fetch_status = FetchStatus::Idle;
                entry.last_fetched_at = Some(now);
                entry.updated_at = Some(Utc::now());
                entry.stale_after = if entry.invalidated_in_flight {
                    Some(now)
                } else {
                    now.checked_add(stale_time)
                };
                debug!("Fetched {}", key);
            }
            Err(err) => {
                entry.error = Some(err.clone());
                entry.fetch_status = FetchStatus::Error;
                stats.failures += 1;
                warn!("Fetch for {} failed: {}", key, err);
            }
        }

        entry.invalidated_in_flight = false;
        if entry.observers == 0 {
            entry.inactive_since = Some(now);
        }
        entry.publish();
    }

    fn collect_garbage(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();

        state.entries.retain(|key, entry| {
            let keep = !entry.is_collectable(now);
            if !keep {
                trace!("Collected cache entry {}", key);
            }
            keep
        });

        // Capacity bound: evict the longest-unobserved idle entries first
        let overflow = state.entries.len().saturating_sub(self.config.max_entries);
        if overflow > 0 {
            let mut idle: Vec<(QueryKey, Instant)> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.observers == 0 && entry.in_flight.is_none())
                .filter_map(|(key, entry)| entry.inactive_since.map(|since| (key.clone(), since)))
                .collect();
            idle.sort_by_key(|(_, since)| *since);
            for (key, _) in idle.into_iter().take(overflow) {
                state.entries.remove(&key);
                trace!("Evicted cache entry {}", key);
            }
        }

        let removed = before - state.entries.len();
        state.stats.collected += removed as u64;
        if removed > 0 {
            debug!("Garbage collected {} cache entries", removed);
        }
        removed
    }
}

/// Shared, cloneable handle to the query cache
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<CacheInner>,
}

impl QueryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::default()),
                config,
                next_generation: AtomicU64::new(0),
                gc_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Return fresh cached data, join a running fetch for the same key, or
    /// start a new fetch. Concurrent callers share one fetch and its outcome.
    pub async fn resolve<T, F, Fut>(&self, key: &QueryKey, fetcher: F, options: &QueryOptions) -> Result<Arc<T>, FetchError>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let acquired = {
            let mut state = self.inner.lock();
            self.acquire(&mut state, key, Some(register(fetcher, options)), false)?
        };

        let data = match acquired {
            Acquired::Fresh(data) => data,
            Acquired::Pending(fetch) => fetch.await?,
        };
        downcast(key, data)
    }

    /// Register an observer on `key`. Starts a background fetch when the entry
    /// is missing or stale; cached data stays visible while it runs.
    pub fn subscribe<T, F, Fut>(&self, key: &QueryKey, fetcher: F, options: &QueryOptions) -> QuerySubscription<T>
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let mut state = self.inner.lock();
        if let Err(err) = self.acquire(&mut state, key, Some(register(fetcher, options)), false) {
            warn!("Could not start fetch for {}: {}", key, err);
        }

        let receiver = match state.entries.get_mut(key) {
            Some(entry) => {
                entry.observers += 1;
                entry.inactive_since = None;
                entry.notifier.subscribe()
            }
            None => {
                let mut entry = CacheEntry::new(options, Instant::now());
                entry.observers = 1;
                entry.inactive_since = None;
                let receiver = entry.notifier.subscribe();
                state.entries.insert(key.clone(), entry);
                receiver
            }
        };
        drop(state);

        trace!("Observer attached to {}", key);
        QuerySubscription::new(key.clone(), receiver, Arc::downgrade(&self.inner))
    }

    /// Warm the cache for `key` without registering an observer. Failures are
    /// logged and otherwise ignored.
    pub fn prefetch<T, F, Fut>(&self, key: &QueryKey, fetcher: F, options: &QueryOptions)
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let acquired = {
            let mut state = self.inner.lock();
            self.acquire(&mut state, key, Some(register(fetcher, options)), false)
        };

        match acquired {
            Ok(Acquired::Fresh(_)) => trace!("Prefetch skipped, {} is fresh", key),
            Ok(Acquired::Pending(fetch)) => {
                let key = key.clone();
                tokio::spawn(async move {
                    if let Err(err) = fetch.await {
                        debug!("Prefetch of {} failed: {}", key, err);
                    }
                });
            }
            Err(err) => debug!("Prefetch of {} not started: {}", key, err),
        }
    }

    /// Fetch `key` again with its registered fetcher, regardless of freshness.
    /// Joins a fetch that is already running; otherwise starts one with a
    /// fresh retry budget.
    pub async fn refetch<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Result<Arc<T>, FetchError> {
        let acquired = {
            let mut state = self.inner.lock();
            self.acquire(&mut state, key, None, true)?
        };

        let data = match acquired {
            Acquired::Fresh(data) => data,
            Acquired::Pending(fetch) => fetch.await?,
        };
        downcast(key, data)
    }

    /// Mark every entry whose key satisfies `predicate` as stale. Data is kept;
    /// entries with active observers are refetched in the background.
    pub fn invalidate<P>(&self, predicate: P) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let now = Instant::now();
        let mut state = self.inner.lock();
        let CacheState { entries, stats } = &mut *state;
        let mut count = 0;

        for (key, entry) in entries.iter_mut().filter(|(key, _)| predicate(*key)) {
            count += 1;
            entry.stale_after = Some(now);

            if entry.in_flight.is_some() {
                entry.invalidated_in_flight = true;
            } else if entry.observers > 0 {
                if let Some(fetcher) = entry.fetcher.clone() {
                    drop(start_fetch(&self.inner, key, entry, stats, fetcher));
                    continue;
                }
            }
            entry.publish();
        }

        debug!("Invalidated {} cache entries", count);
        count
    }

    /// Invalidate every key under a resource prefix such as `blog/posts`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        self.invalidate(|key| key.matches_prefix(prefix))
    }

    /// Cached data for `key`, fresh or stale
    pub fn get_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<Arc<T>> {
        let data = {
            let state = self.inner.lock();
            state.entries.get(key)?.data.clone()?
        };
        downcast(key, data).ok()
    }

    /// Typed state of `key` without registering an observer
    pub fn query_state<T: Send + Sync + 'static>(&self, key: &QueryKey) -> Option<QueryState<T>> {
        let snapshot = self.inner.lock().entries.get(key)?.snapshot();
        Some(QueryState::from_snapshot(key, &snapshot))
    }

    /// Store data for `key` directly, as if a fetch had just succeeded.
    /// Values of a different type than the entry already holds are refused.
    pub fn set_query_data<T: Send + Sync + 'static>(&self, key: &QueryKey, value: T, options: &QueryOptions) -> Result<(), FetchError> {
        let now = Instant::now();
        let mut state = self.inner.lock();
        let entry = state
            .entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(options, now));

        let value_type = TypeId::of::<T>();
        if entry.value_type.map_or(false, |existing| existing != value_type) {
            return Err(FetchError::TypeMismatch(key.to_string()));
        }
        entry.value_type = Some(value_type);
        entry.data = Some(Arc::new(value) as QueryData);
        entry.error = None;
        entry.fetch_status = if entry.in_flight.is_some() {
            FetchStatus::Fetching
        } else {
            FetchStatus::Idle
        };
        entry.stale_after = now.checked_add(options.stale_time);
        entry.updated_at = Some(Utc::now());
        entry.last_fetched_at = Some(now);
        entry.publish();
        Ok(())
    }

    pub fn observer_count(&self, key: &QueryKey) -> usize {
        self.inner.lock().entries.get(key).map_or(0, |entry| entry.observers)
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(false, |entry| entry.in_flight.is_some())
    }

    /// Remove entries that have had no observers for longer than their gc time
    pub fn collect_garbage(&self) -> usize {
        self.inner.collect_garbage()
    }

    /// Run [`collect_garbage`](Self::collect_garbage) periodically until disposed
    pub fn start_gc(&self) {
        let interval = self.inner.config.gc_interval;
        let cache = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = cache.upgrade() else { break };
                inner.collect_garbage();
            }
        });

        let mut task = self.inner.gc_task.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = task.replace(handle) {
            previous.abort();
        }
        debug!("Query cache collector running every {:?}", interval);
    }

    /// Stop the collector and drop every entry
    pub fn dispose(&self) {
        if let Some(task) = self
            .inner
            .gc_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }

        let mut state = self.inner.lock();
        let count = state.entries.len();
        state.entries.clear();
        debug!("Query cache disposed ({} entries dropped)", count);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        CacheStats {
            entries: state.entries.len(),
            ..state.stats.clone()
        }
    }

    fn acquire(
        &self,
        state: &mut CacheState,
        key: &QueryKey,
        registration: Option<Registration<'_>>,
        force: bool,
    ) -> Result<Acquired, FetchError> {
        let now = Instant::now();
        let CacheState { entries, stats } = state;

        let entry = match (entries.contains_key(key), &registration) {
            (false, None) => return Err(FetchError::UnknownQuery(key.to_string())),
            (false, Some(registration)) => entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::new(registration.options, now)),
            (true, _) => entries
                .get_mut(key)
                .ok_or_else(|| FetchError::UnknownQuery(key.to_string()))?,
        };

        if let Some(Registration { fetcher, value_type, options }) = registration {
            if entry.value_type.map_or(false, |existing| existing != value_type) {
                return Err(FetchError::TypeMismatch(key.to_string()));
            }
            entry.value_type = Some(value_type);
            entry.fetcher = Some(fetcher);
            entry.gc_time = entry.gc_time.max(options.gc_time);
            entry.options = options.clone();
        }

        if let Some(fetch) = &entry.in_flight {
            stats.deduplicated += 1;
            trace!("Joining in-flight fetch for {}", key);
            return Ok(Acquired::Pending(fetch.clone()));
        }

        if !force && entry.is_fresh(now) {
            if let Some(data) = &entry.data {
                stats.hits += 1;
                trace!("Cache hit for {}", key);
                return Ok(Acquired::Fresh(Arc::clone(data)));
            }
        }

        let fetcher = entry
            .fetcher
            .clone()
            .ok_or_else(|| FetchError::UnknownQuery(key.to_string()))?;
        if !force {
            stats.misses += 1;
        }
        Ok(Acquired::Pending(start_fetch(&self.inner, key, entry, stats, fetcher)))
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Spawn a fetch for `entry`. The spawned task owns the fetch, so it runs to
/// completion and settles the entry even if every waiter goes away.
fn start_fetch(
    inner: &Arc<CacheInner>,
    key: &QueryKey,
    entry: &mut CacheEntry,
    stats: &mut CacheStats,
    fetcher: ErasedFetcher,
) -> SharedFetch {
    entry.generation = inner.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
    entry.fetch_status = FetchStatus::Fetching;
    entry.invalidated_in_flight = false;
    stats.fetches += 1;

    let generation = entry.generation;
    let options = entry.options.clone();
    let cache = Arc::downgrade(inner);
    let task_key = key.clone();
    debug!("Fetching {}", key);

    let handle = tokio::spawn(async move {
        let attempt = run_with_retry(&options.retry, || fetcher());
        let outcome = match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => Err(FetchError::Aborted(format!("fetcher for {} panicked", task_key))),
        };
        if let Some(inner) = cache.upgrade() {
            inner.settle(&task_key, generation, &outcome, options.stale_time);
        }
        outcome
    });

    let fetch = async move {
        match handle.await {
            Ok(outcome) => outcome,
            Err(err) => Err(FetchError::Aborted(err.to_string())),
        }
    }
    .boxed()
    .shared();

    entry.in_flight = Some(fetch.clone());
    entry.publish();
    fetch
}

fn register<T, F, Fut>(fetcher: F, options: &QueryOptions) -> Registration<'_>
where
    T: Send + Sync + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    let fetcher: ErasedFetcher = Arc::new(move || {
        let fetch = fetcher();
        async move { fetch.await.map(|value| Arc::new(value) as QueryData) }.boxed()
    });
    Registration {
        fetcher,
        value_type: TypeId::of::<T>(),
        options,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::options::RetryPolicy;
    use crate::query::QueryStatus;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn fast_options() -> QueryOptions {
        QueryOptions::default()
            .with_stale_time(Duration::from_secs(60))
            .with_retry(RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)))
    }

    fn counting_fetcher(
        calls: &Arc<AtomicUsize>,
        delay: Duration,
    ) -> impl Fn() -> BoxFuture<'static, Result<usize, FetchError>> + Send + Sync + 'static {
        let calls = Arc::clone(calls);
        move || {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                tokio::time::sleep(delay).await;
                Ok(n)
            }
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_fresh_data_is_served_from_cache() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);

        let first = cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();
        let second = cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();

        assert_eq!(*first, 1);
        assert_eq!(*second, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);
        let options = fast_options();

        let (a, b, c) = tokio::join!(
            cache.resolve(&key, counting_fetcher(&calls, Duration::from_millis(10)), &options),
            cache.resolve(&key, counting_fetcher(&calls, Duration::from_millis(10)), &options),
            cache.resolve(&key, counting_fetcher(&calls, Duration::from_millis(10)), &options),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!((*a.unwrap(), *b.unwrap(), *c.unwrap()), (1, 1, 1));
        assert_eq!(cache.stats().deduplicated, 2);
    }

    #[tokio::test]
    async fn test_invalidation_keeps_data_and_forces_refetch() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);
        let tags = QueryKey::new("blog/tags");

        cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();
        cache
            .resolve(&tags, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();

        assert_eq!(cache.invalidate_prefix("blog/posts"), 1);
        assert_eq!(cache.get_query_data::<usize>(&key).as_deref(), Some(&1));
        assert!(cache.query_state::<usize>(&key).unwrap().is_stale);
        assert!(!cache.query_state::<usize>(&tags).unwrap().is_stale);

        let refreshed = cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();
        assert_eq!(*refreshed, 3);
    }

    #[tokio::test]
    async fn test_invalidation_refetches_observed_entries() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);

        let mut subscription = cache.subscribe(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options());
        assert_eq!(subscription.settled().await.data.as_deref(), Some(&1));

        cache.invalidate_prefix("blog");
        let state = subscription.state();
        assert!(state.is_fetching());
        assert_eq!(state.data.as_deref(), Some(&1));

        let state = subscription.settled().await;
        assert_eq!(state.data.as_deref(), Some(&2));
        assert_eq!(state.status, QueryStatus::Success);
    }

    #[tokio::test]
    async fn test_invalidation_during_fetch_leaves_result_stale() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);
        let options = fast_options();

        let pending = cache.resolve(&key, counting_fetcher(&calls, Duration::from_millis(10)), &options);
        let invalidate = async {
            tokio::time::sleep(Duration::from_millis(2)).await;
            cache.invalidate_prefix("blog/posts")
        };
        let (result, invalidated) = tokio::join!(pending, invalidate);

        assert_eq!(*result.unwrap(), 1);
        assert_eq!(invalidated, 1);
        assert!(cache.query_state::<usize>(&key).unwrap().is_stale);
    }

    #[tokio::test]
    async fn test_retries_then_surfaces_error_to_every_waiter() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("blog/tags");
        let options = fast_options();

        let fetcher = |calls: Arc<AtomicUsize>| {
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<usize, _>(FetchError::Transport("connection reset".into())) }
            }
        };

        let (a, b) = tokio::join!(
            cache.resolve(&key, fetcher(Arc::clone(&calls)), &options),
            cache.resolve(&key, fetcher(Arc::clone(&calls)), &options),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(a, Err(FetchError::Transport(_))));
        assert!(matches!(b, Err(FetchError::Transport(_))));

        let state = cache.query_state::<usize>(&key).unwrap();
        assert_eq!(state.fetch_status, FetchStatus::Error);
        assert_eq!(state.status, QueryStatus::Error);
        assert!(state.data.is_none());
        assert_eq!(cache.stats().failures, 1);
    }

    #[tokio::test]
    async fn test_failed_refetch_keeps_previous_data() {
        let cache = QueryCache::default();
        let fail = Arc::new(AtomicBool::new(false));
        let key = QueryKey::paged("blog/posts/list", 1, 10);
        let options = fast_options();

        let flag = Arc::clone(&fail);
        let fetcher = move || {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(FetchError::Transport("offline".into()))
                } else {
                    Ok(String::from("page one"))
                }
            }
        };

        cache.resolve(&key, fetcher.clone(), &options).await.unwrap();
        fail.store(true, Ordering::SeqCst);
        cache.invalidate_prefix("blog/posts");

        assert!(cache.resolve(&key, fetcher.clone(), &options).await.is_err());
        let state = cache.query_state::<String>(&key).unwrap();
        assert_eq!(state.data.as_deref().map(String::as_str), Some("page one"));
        assert_eq!(state.status, QueryStatus::Error);

        fail.store(false, Ordering::SeqCst);
        let recovered = cache.refetch::<String>(&key).await.unwrap();
        assert_eq!(recovered.as_str(), "page one");
        assert_eq!(cache.query_state::<String>(&key).unwrap().status, QueryStatus::Success);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("blog/post/missing");

        let counter = Arc::clone(&calls);
        let result = cache
            .resolve(
                &key,
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err::<usize, _>(FetchError::NotFound("Blog post 'missing'".into())) }
                },
                &fast_options(),
            )
            .await;

        assert!(matches!(result, Err(FetchError::NotFound(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refetch_requires_registered_fetcher() {
        let cache = QueryCache::default();
        let result = cache.refetch::<usize>(&QueryKey::new("blog/authors")).await;
        assert!(matches!(result, Err(FetchError::UnknownQuery(_))));
    }

    #[tokio::test]
    async fn test_type_mismatch_is_reported() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("blog/tags");

        cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();

        let wrong = cache
            .resolve(&key, || async { Ok(String::new()) }, &fast_options())
            .await;
        assert!(matches!(wrong, Err(FetchError::TypeMismatch(_))));
        assert!(cache.get_query_data::<String>(&key).is_none());
    }

    #[tokio::test]
    async fn test_mismatched_registration_keeps_original_fetcher() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("blog/tags");

        let mut subscription = cache.subscribe(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options());
        subscription.settled().await;

        let wrong = cache
            .resolve(&key, || async { Ok(String::from("tags")) }, &fast_options())
            .await;
        assert!(matches!(wrong, Err(FetchError::TypeMismatch(_))));
        assert!(cache.set_query_data(&key, String::from("tags"), &fast_options()).is_err());

        cache.invalidate_prefix("blog");
        let state = subscription.settled().await;
        assert_eq!(state.data.as_deref(), Some(&2));
        assert_eq!(state.status, QueryStatus::Success);
    }

    #[tokio::test]
    #[allow(unreachable_code)]
    async fn test_panicking_fetcher_settles_as_aborted() {
        let cache = QueryCache::default();
        let key = QueryKey::new("blog/authors");

        let result = cache
            .resolve(
                &key,
                || async {
                    panic!("source exploded");
                    Ok::<usize, FetchError>(0)
                },
                &fast_options(),
            )
            .await;

        assert!(matches!(result, Err(FetchError::Aborted(_))));
        assert!(!cache.is_fetching(&key));
        let state = cache.query_state::<usize>(&key).unwrap();
        assert_eq!(state.fetch_status, FetchStatus::Error);
        assert_eq!(state.status, QueryStatus::Error);
    }

    #[tokio::test]
    async fn test_fetch_outliving_dispose_cannot_settle_new_entry() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);

        let counter = Arc::clone(&calls);
        let fetcher = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                let delay = if n == 1 { 20 } else { 80 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                Ok::<usize, FetchError>(n)
            }
        };

        cache.prefetch(&key, fetcher.clone(), &fast_options());
        cache.dispose();
        cache.prefetch(&key, fetcher.clone(), &fast_options());

        // The first fetch finishes while the second is still running
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.is_fetching(&key));

        cache.prefetch(&key, fetcher.clone(), &fast_options());
        let value = cache.resolve(&key, fetcher, &fast_options()).await.unwrap();
        assert_eq!(*value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_prefetch_warms_cache() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 2, 10);

        cache.prefetch(&key, counting_fetcher(&calls, Duration::from_millis(5)), &fast_options());
        assert!(cache.is_fetching(&key));
        assert_eq!(cache.observer_count(&key), 0);

        let value = cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();
        assert_eq!(*value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_subscription_detaches_but_fetch_completes() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::paged("blog/posts/list", 1, 10);

        let subscription = cache.subscribe(&key, counting_fetcher(&calls, Duration::from_millis(10)), &fast_options());
        assert_eq!(cache.observer_count(&key), 1);
        drop(subscription);
        assert_eq!(cache.observer_count(&key), 0);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get_query_data::<usize>(&key).as_deref(), Some(&1));
    }

    #[tokio::test]
    async fn test_garbage_collection_spares_observed_entries() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let options = fast_options().with_gc_time(Duration::ZERO);
        let watched = QueryKey::paged("blog/posts/list", 1, 10);
        let idle = QueryKey::paged("blog/posts/list", 2, 10);

        let mut subscription = cache.subscribe(&watched, counting_fetcher(&calls, Duration::ZERO), &options);
        subscription.settled().await;
        cache
            .resolve(&idle, counting_fetcher(&calls, Duration::ZERO), &options)
            .await
            .unwrap();

        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.get_query_data::<usize>(&idle).is_none());
        assert!(cache.get_query_data::<usize>(&watched).is_some());

        drop(subscription);
        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().collected, 2);
    }

    #[tokio::test]
    async fn test_gc_time_is_respected() {
        let cache = QueryCache::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("blog/tags");

        cache
            .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
            .await
            .unwrap();
        assert_eq!(cache.collect_garbage(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_idle_entries() {
        let cache = QueryCache::new(CacheConfig {
            max_entries: 2,
            ..CacheConfig::default()
        });
        let calls = Arc::new(AtomicUsize::new(0));

        for page in 1..=3 {
            let key = QueryKey::paged("blog/posts/list", page, 10);
            cache
                .resolve(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        assert_eq!(cache.collect_garbage(), 1);
        assert!(cache
            .get_query_data::<usize>(&QueryKey::paged("blog/posts/list", 1, 10))
            .is_none());
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_dispose_closes_subscriptions() {
        let cache = QueryCache::default();
        cache.start_gc();
        let calls = Arc::new(AtomicUsize::new(0));
        let key = QueryKey::new("blog/authors");

        let mut subscription = cache.subscribe(&key, counting_fetcher(&calls, Duration::ZERO), &fast_options());
        subscription.settled().await;

        cache.dispose();
        assert!(cache.is_empty());
        assert!(subscription.changed().await.is_none());
    }

    #[tokio::test]
    async fn test_set_query_data_is_visible_to_observers() {
        let cache = QueryCache::default();
        let key = QueryKey::new("blog/post/hello");
        cache.set_query_data(&key, String::from("hello"), &fast_options()).unwrap();

        let state = cache.query_state::<String>(&key).unwrap();
        assert_eq!(state.status, QueryStatus::Success);
        assert!(!state.is_stale);
    }
}
