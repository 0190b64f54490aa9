//! Query cache layer: keyed, de-duplicated, retrying data fetches with
//! staleness tracking and garbage collection

pub mod cache;
pub mod errors;
pub mod key;
pub mod observer;
pub mod options;

pub use cache::{CacheConfig, CacheStats, FetchStatus, QueryCache};
pub use errors::{FetchError, FetchResult};
pub use key::QueryKey;
pub use observer::{QueryState, QueryStatus, QuerySubscription};
pub use options::{run_with_retry, QueryOptions, RetryPolicy};
