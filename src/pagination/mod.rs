//! Client-side pagination: page window computation and pagination state.

pub mod state;
pub mod window;

pub use state::{PaginationConfig, PaginationError, PaginationEvent, PaginationState, PaginationView};
pub use window::{visible_pages, PageItem};
