//! Typed views over cache entries and scoped observer handles

use super::cache::{CacheInner, FetchStatus, QueryData, Snapshot};
use super::errors::FetchError;
use super::key::QueryKey;
use chrono::{DateTime, Utc};
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::sync::watch;

/// Overall status of a query as seen by a consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    /// No data yet and no settled error
    Pending,
    /// Data is available
    Success,
    /// The last fetch failed; `data` may still hold last-known-good data
    Error,
}

/// Typed snapshot of one cache entry
#[derive(Debug)]
pub struct QueryState<T> {
    pub data: Option<Arc<T>>,
    pub error: Option<FetchError>,
    pub fetch_status: FetchStatus,
    pub status: QueryStatus,
    pub is_stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> Clone for QueryState<T> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
            error: self.error.clone(),
            fetch_status: self.fetch_status,
            status: self.status,
            is_stale: self.is_stale,
            updated_at: self.updated_at,
        }
    }
}

impl<T: Send + Sync + 'static> QueryState<T> {
    pub(super) fn from_snapshot(key: &QueryKey, snapshot: &Snapshot) -> Self {
        let mut error = snapshot.error.clone();
        let data = match snapshot.data.clone().map(|data| downcast::<T>(key, data)) {
            Some(Ok(data)) => Some(data),
            Some(Err(mismatch)) => {
                error = Some(mismatch);
                None
            }
            None => None,
        };

        let status = if error.is_some() && (snapshot.fetch_status == FetchStatus::Error || data.is_none()) {
            QueryStatus::Error
        } else if data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Pending
        };

        let is_stale = snapshot.data.is_none()
            || snapshot.stale_after.map_or(false, |deadline| Instant::now() >= deadline);

        Self {
            data,
            error,
            fetch_status: snapshot.fetch_status,
            status,
            is_stale,
            updated_at: snapshot.updated_at,
        }
    }

    pub fn is_fetching(&self) -> bool {
        self.fetch_status == FetchStatus::Fetching
    }
}

pub(super) fn downcast<T: Send + Sync + 'static>(key: &QueryKey, data: QueryData) -> Result<Arc<T>, FetchError> {
    data.downcast::<T>()
        .map_err(|_| FetchError::TypeMismatch(key.to_string()))
}

/// An observer registered on one cache entry.
///
/// While alive it keeps the entry from being garbage collected and receives
/// every update to it. Dropping it detaches the observer; a fetch that is
/// still running completes and populates the cache regardless.
#[must_use = "dropping a QuerySubscription detaches the observer immediately"]
pub struct QuerySubscription<T> {
    key: QueryKey,
    receiver: watch::Receiver<Snapshot>,
    cache: Weak<CacheInner>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> QuerySubscription<T> {
    pub(super) fn new(key: QueryKey, receiver: watch::Receiver<Snapshot>, cache: Weak<CacheInner>) -> Self {
        Self {
            key,
            receiver,
            cache,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Current state of the observed entry
    pub fn state(&self) -> QueryState<T> {
        QueryState::from_snapshot(&self.key, &self.receiver.borrow())
    }

    /// Wait for the next update; `None` once the entry is gone (cache disposed)
    pub async fn changed(&mut self) -> Option<QueryState<T>> {
        self.receiver.changed().await.ok()?;
        Some(self.state())
    }

    /// Wait until no fetch is running for the entry
    pub async fn settled(&mut self) -> QueryState<T> {
        loop {
            let state = self.state();
            if !state.is_fetching() {
                return state;
            }
            if self.receiver.changed().await.is_err() {
                return self.state();
            }
        }
    }
}

impl<T> Drop for QuerySubscription<T> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.upgrade() {
            cache.release_observer(&self.key);
        }
    }
}

impl<T> std::fmt::Debug for QuerySubscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuerySubscription")
            .field("key", &self.key)
            .finish()
    }
}
