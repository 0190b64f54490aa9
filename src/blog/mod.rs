//! Blog domain: models, data sources, cached queries and the list controller

pub mod controller;
pub mod keys;
pub mod model;
pub mod service;
pub mod source;

pub use controller::{ListController, ListMessage, ListView, LoadState};
pub use keys::BlogQueryKeys;
pub use model::{BlogPost, PostDraft, PostFilters, PostPage, PostQuery};
pub use service::{BlogService, QueryPresets};
pub use source::{BlogSource, SimulatedBlogSource, SimulatedSourceConfig};
