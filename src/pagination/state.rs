//! Pagination state with derived quantities and change notifications.

use super::window::{visible_pages, PageItem};
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Errors raised by invalid pagination arguments
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaginationError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Pagination events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationEvent {
    /// Page changed
    PageChanged {
        old_page: usize,
        new_page: usize,
        page_size: usize,
    },

    /// Page size changed
    PageSizeChanged {
        old_size: usize,
        new_size: usize,
        new_total_pages: usize,
    },
}

/// Pagination configuration
#[derive(Debug, Clone)]
pub struct PaginationConfig {
    /// Initial page size
    pub default_page_size: usize,

    /// Page sizes offered to the user
    pub available_page_sizes: Vec<usize>,

    /// Budget of page buttons in the rendered window
    pub max_visible_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: 10,
            available_page_sizes: vec![5, 10, 20, 50],
            max_visible_pages: 10,
        }
    }
}

/// Read-only view of the pagination state for renderers
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaginationView {
    pub current_page: usize,
    pub page_size: usize,
    pub total_items: usize,
    pub total_pages: usize,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    pub start_item: usize,
    pub end_item: usize,
    pub pages: Vec<PageItem>,
}

impl Default for PaginationView {
    fn default() -> Self {
        PaginationState::new().snapshot()
    }
}

/// Current page, page size and total item count.
///
/// Pages are 1-based. Everything else (total pages, boundaries, item range,
/// page window) is derived on read.
pub struct PaginationState {
    current_page: usize,
    page_size: usize,
    total_items: usize,
    config: PaginationConfig,
    callbacks: Vec<Box<dyn Fn(&PaginationEvent) + Send + Sync>>,
}

impl std::fmt::Debug for PaginationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginationState")
            .field("current_page", &self.current_page)
            .field("page_size", &self.page_size)
            .field("total_items", &self.total_items)
            .field("config", &self.config)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

impl PaginationState {
    /// Create pagination state with the default configuration
    pub fn new() -> Self {
        Self::with_config(PaginationConfig::default())
    }

    /// Create pagination state with a custom configuration
    pub fn with_config(config: PaginationConfig) -> Self {
        Self {
            current_page: 1,
            page_size: config.default_page_size.max(1),
            total_items: 0,
            config,
            callbacks: Vec::new(),
        }
    }

    pub fn current_page(&self) -> usize {
        self.current_page
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn config(&self) -> &PaginationConfig {
        &self.config
    }

    /// Total number of pages, never less than one
    pub fn total_pages(&self) -> usize {
        self.total_items.div_ceil(self.page_size).max(1)
    }

    pub fn has_next_page(&self) -> bool {
        self.current_page < self.total_pages()
    }

    pub fn has_prev_page(&self) -> bool {
        self.current_page > 1
    }

    /// First and last item numbers shown on the current page, `(0, 0)` when empty
    pub fn item_range_shown(&self) -> (usize, usize) {
        if self.total_items == 0 {
            return (0, 0);
        }
        let start = (self.current_page - 1) * self.page_size + 1;
        let end = (self.current_page * self.page_size).min(self.total_items);
        (start, end)
    }

    /// Page buttons to render for the current page
    pub fn visible_pages(&self) -> Vec<PageItem> {
        visible_pages(self.current_page, self.total_pages(), self.config.max_visible_pages)
    }

    /// Add an event callback
    pub fn add_callback<F>(&mut self, callback: F)
    where
        F: Fn(&PaginationEvent) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Go to a specific page.
    ///
    /// Returns `false` without emitting anything when the page is current or
    /// out of range.
    pub fn set_page(&mut self, page: usize) -> bool {
        if page == self.current_page || page < 1 || page > self.total_pages() {
            return false;
        }

        let old_page = self.current_page;
        self.current_page = page;
        trace!("Page changed {} -> {}", old_page, page);
        self.emit_event(PaginationEvent::PageChanged {
            old_page,
            new_page: page,
            page_size: self.page_size,
        });
        true
    }

    /// Set the page size and return to the first page
    pub fn set_page_size(&mut self, size: usize) -> Result<(), PaginationError> {
        if size == 0 {
            return Err(PaginationError::InvalidArgument(
                "page size must be greater than 0".to_string(),
            ));
        }

        let old_size = self.page_size;
        let old_page = self.current_page;
        self.page_size = size;
        self.current_page = 1;

        if old_size != size || old_page != 1 {
            self.emit_event(PaginationEvent::PageSizeChanged {
                old_size,
                new_size: size,
                new_total_pages: self.total_pages(),
            });
        }

        Ok(())
    }

    /// Step to the next or previous entry of the available page sizes
    pub fn cycle_page_size(&mut self, forward: bool) -> Result<usize, PaginationError> {
        let sizes = &self.config.available_page_sizes;
        if sizes.is_empty() {
            return Ok(self.page_size);
        }

        let position = sizes.iter().position(|&s| s == self.page_size);
        let next = match (position, forward) {
            (Some(i), true) => sizes[(i + 1) % sizes.len()],
            (Some(i), false) => sizes[(i + sizes.len() - 1) % sizes.len()],
            (None, true) => sizes.iter().copied().find(|&s| s > self.page_size).unwrap_or(sizes[0]),
            (None, false) => sizes
                .iter()
                .copied()
                .rev()
                .find(|&s| s < self.page_size)
                .unwrap_or(sizes[sizes.len() - 1]),
        };

        self.set_page_size(next)?;
        Ok(next)
    }

    /// Store a new total and clamp the current page into range
    pub fn set_total_items(&mut self, total: usize) {
        self.total_items = total;

        let max_page = self.total_pages();
        if self.current_page > max_page {
            self.current_page = max_page;
        }
    }

    /// Go to the next page
    pub fn next(&mut self) -> bool {
        if !self.has_next_page() {
            return false;
        }
        self.set_page(self.current_page + 1)
    }

    /// Go to the previous page
    pub fn prev(&mut self) -> bool {
        if !self.has_prev_page() {
            return false;
        }
        self.set_page(self.current_page - 1)
    }

    /// Go to the first page
    pub fn first(&mut self) -> bool {
        self.set_page(1)
    }

    /// Go to the last page
    pub fn last(&mut self) -> bool {
        self.set_page(self.total_pages())
    }

    /// Go to a page typed in by the user; unparsable input is ignored
    pub fn jump_to(&mut self, input: &str) -> bool {
        match input.trim().parse::<usize>() {
            Ok(page) => self.set_page(page),
            Err(_) => false,
        }
    }

    /// Capture the current state for rendering
    pub fn snapshot(&self) -> PaginationView {
        let (start_item, end_item) = self.item_range_shown();
        PaginationView {
            current_page: self.current_page,
            page_size: self.page_size,
            total_items: self.total_items,
            total_pages: self.total_pages(),
            has_next_page: self.has_next_page(),
            has_prev_page: self.has_prev_page(),
            start_item,
            end_item,
            pages: self.visible_pages(),
        }
    }

    /// Emit an event to all callbacks
    fn emit_event(&self, event: PaginationEvent) {
        for callback in &self.callbacks {
            callback(&event);
        }
    }
}

impl Default for PaginationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn state_with(total: usize, page_size: usize) -> PaginationState {
        let mut state = PaginationState::with_config(PaginationConfig {
            default_page_size: page_size,
            ..PaginationConfig::default()
        });
        state.set_total_items(total);
        state
    }

    #[test]
    fn test_pagination_state_creation() {
        let state = PaginationState::new();
        assert_eq!(state.current_page(), 1);
        assert_eq!(state.total_pages(), 1);
        assert_eq!(state.item_range_shown(), (0, 0));
        assert!(!state.has_next_page());
        assert!(!state.has_prev_page());
    }

    #[test]
    fn test_last_page_range() {
        let mut state = state_with(47, 10);
        assert_eq!(state.total_pages(), 5);

        assert!(state.set_page(5));
        assert_eq!(state.item_range_shown(), (41, 47));
        assert!(!state.has_next_page());
        assert!(state.has_prev_page());
    }

    #[test]
    fn test_page_size_change_resets_page() {
        let mut state = state_with(47, 10);
        state.set_page(3);

        state.set_page_size(5).unwrap();
        assert_eq!(state.current_page(), 1);
        assert_eq!(state.page_size(), 5);
        assert_eq!(state.total_pages(), 10);
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let mut state = state_with(47, 10);
        state.set_page(2);

        let err = state.set_page_size(0).unwrap_err();
        assert!(matches!(err, PaginationError::InvalidArgument(_)));
        assert_eq!(state.page_size(), 10);
        assert_eq!(state.current_page(), 2);
    }

    #[test]
    fn test_set_page_ignores_out_of_range_and_current() {
        let mut state = state_with(30, 10);
        assert!(!state.set_page(0));
        assert!(!state.set_page(4));
        assert!(!state.set_page(1));
        assert_eq!(state.current_page(), 1);
    }

    #[test]
    fn test_next_prev_boundaries() {
        let mut state = state_with(25, 10);
        assert!(!state.prev());

        assert!(state.next());
        assert!(state.next());
        assert_eq!(state.current_page(), 3);
        assert!(!state.next());
        assert_eq!(state.item_range_shown(), (21, 25));

        assert!(state.prev());
        assert_eq!(state.current_page(), 2);

        assert!(state.first());
        assert_eq!(state.current_page(), 1);
        assert!(state.last());
        assert_eq!(state.current_page(), 3);
    }

    #[test]
    fn test_total_shrink_clamps_current_page() {
        let mut state = state_with(100, 10);
        state.set_page(9);

        state.set_total_items(35);
        assert_eq!(state.current_page(), 4);

        state.set_total_items(0);
        assert_eq!(state.current_page(), 1);
        assert_eq!(state.item_range_shown(), (0, 0));
    }

    #[test]
    fn test_item_range_is_ordered() {
        for total in 1..60 {
            for size in 1..12 {
                let mut state = state_with(total, size);
                for page in 1..=state.total_pages() {
                    state.set_page(page);
                    let (start, end) = state.item_range_shown();
                    assert!(start >= 1 && start <= end && end <= total);
                }
            }
        }
    }

    #[test]
    fn test_jump_to() {
        let mut state = state_with(100, 10);
        assert!(state.jump_to(" 7 "));
        assert_eq!(state.current_page(), 7);
        assert!(!state.jump_to("abc"));
        assert!(!state.jump_to("11"));
        assert_eq!(state.current_page(), 7);
    }

    #[test]
    fn test_cycle_page_size() {
        let mut state = state_with(100, 10);
        assert_eq!(state.cycle_page_size(true).unwrap(), 20);
        assert_eq!(state.cycle_page_size(true).unwrap(), 50);
        assert_eq!(state.cycle_page_size(true).unwrap(), 5);
        assert_eq!(state.cycle_page_size(false).unwrap(), 50);

        let mut odd = state_with(100, 7);
        assert_eq!(odd.cycle_page_size(true).unwrap(), 10);
    }

    #[test]
    fn test_events_are_emitted() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);

        let mut state = state_with(47, 10);
        state.add_callback(move |event| sink.lock().unwrap().push(event.clone()));

        state.set_page(2);
        state.set_page(2);
        state.set_page_size(5).unwrap();

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![
                PaginationEvent::PageChanged { old_page: 1, new_page: 2, page_size: 10 },
                PaginationEvent::PageSizeChanged { old_size: 10, new_size: 5, new_total_pages: 10 },
            ]
        );
    }

    #[test]
    fn test_snapshot() {
        let mut state = state_with(47, 10);
        state.set_page(3);

        let view = state.snapshot();
        assert_eq!(view.current_page, 3);
        assert_eq!(view.total_pages, 5);
        assert_eq!((view.start_item, view.end_item), (21, 30));
        assert_eq!(view.pages, (1..=5).map(PageItem::Page).collect::<Vec<_>>());
    }
}
