//! Error types for query fetching

use thiserror::Error;

/// Failure of a fetch, shared with every observer of the query.
///
/// The type is `Clone` because a single in-flight fetch settles for all of
/// its waiters at once.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Cached value for {0} has a different type")]
    TypeMismatch(String),

    #[error("No fetcher registered for {0}")]
    UnknownQuery(String),

    #[error("Fetch aborted: {0}")]
    Aborted(String),
}

impl FetchError {
    /// Whether the retry policy applies to this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport(_))
    }
}

pub type FetchResult<T> = Result<T, FetchError>;
