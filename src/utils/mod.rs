//! Shared utilities

pub mod signal;
pub mod text;

pub use signal::{Signal, Subscription};
