//! List controller: filters and pagination driving the query cache
//!
//! Every change to the page, page size or a filter builds a new list query
//! and starts a load. Results come back as [`ListMessage`]s tagged with the
//! sequence number of the load that produced them; anything from a superseded
//! load is dropped, so the view always reflects the most recent request.

use super::model::{non_blank, BlogPost, PostFilters, PostPage, PostQuery};
use super::service::BlogService;
use crate::pagination::{PaginationConfig, PaginationError, PaginationState, PaginationView};
use crate::query::{FetchError, QueryState, QueryStatus};
use crate::utils::Signal;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Lifecycle of the most recent load
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Idle,
    Loading,
    Success,
    Error,
}

/// Everything a renderer needs for the post list screen
#[derive(Debug, Clone, Serialize)]
pub struct ListView {
    pub state: LoadState,
    pub posts: Vec<BlogPost>,
    pub total: usize,
    pub error: Option<String>,
    pub pagination: PaginationView,
    pub filters: PostFilters,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    /// A fetch for the current query is running
    pub is_fetching: bool,
    /// Shown data is older than its stale time
    pub is_stale: bool,
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ListView {
    fn default() -> Self {
        Self {
            state: LoadState::Idle,
            posts: Vec::new(),
            total: 0,
            error: None,
            pagination: PaginationView::default(),
            filters: PostFilters::default(),
            tags: Vec::new(),
            authors: Vec::new(),
            is_fetching: false,
            is_stale: false,
            last_updated: None,
        }
    }
}

impl ListView {
    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }
}

/// Results delivered to [`ListController::apply`]
#[derive(Debug)]
pub enum ListMessage {
    Posts { seq: u64, state: QueryState<PostPage> },
    Tags(Result<Arc<Vec<String>>, FetchError>),
    Authors(Result<Arc<Vec<String>>, FetchError>),
}

pub struct ListController {
    service: BlogService,
    pagination: PaginationState,
    filters: PostFilters,
    view: Signal<ListView>,
    seq: u64,
    in_flight: Option<PostQuery>,
    forwarder: Option<JoinHandle<()>>,
    sender: mpsc::UnboundedSender<ListMessage>,
    receiver: mpsc::UnboundedReceiver<ListMessage>,
}

impl ListController {
    pub fn new(service: BlogService, config: PaginationConfig) -> Self {
        let mut pagination = PaginationState::with_config(config);
        pagination.add_callback(|event| trace!("Pagination: {:?}", event));
        let (sender, receiver) = mpsc::unbounded_channel();
        let view = Signal::new(ListView {
            pagination: pagination.snapshot(),
            ..ListView::default()
        });

        Self {
            service,
            pagination,
            filters: PostFilters::default(),
            view,
            seq: 0,
            in_flight: None,
            forwarder: None,
            sender,
            receiver,
        }
    }

    /// Observable view; subscribe to get notified on every change
    pub fn signal(&self) -> Signal<ListView> {
        self.view.clone()
    }

    pub fn view(&self) -> ListView {
        self.view.get()
    }

    pub fn pagination(&self) -> &PaginationState {
        &self.pagination
    }

    pub fn filters(&self) -> &PostFilters {
        &self.filters
    }

    #[cfg(test)]
    pub fn service(&self) -> &BlogService {
        &self.service
    }

    /// The request the current state describes
    pub fn current_query(&self) -> PostQuery {
        PostQuery::new(self.pagination.current_page(), self.pagination.page_size())
            .with_filters(self.filters.clone())
    }

    /// Start loading the current query. Cached data for it, fresh or stale,
    /// is shown right away.
    pub fn load(&mut self) {
        self.seq += 1;
        let seq = self.seq;

        if let Some(previous) = self.forwarder.take() {
            previous.abort();
        }

        let query = self.current_query();
        let mut subscription = self.service.watch_posts(&query);
        let initial = subscription.state();
        debug!("Loading {} (request {})", subscription.key(), seq);

        let pagination = self.pagination.snapshot();
        let filters = self.filters.clone();
        self.view.update(|view| {
            view.state = LoadState::Loading;
            view.error = None;
            view.pagination = pagination;
            view.filters = filters;
            view.is_fetching = true;
            if let Some(page) = &initial.data {
                view.posts = page.posts.clone();
                view.total = page.total;
                view.is_stale = initial.is_stale;
                view.last_updated = initial.updated_at;
            }
        });

        let sender = self.sender.clone();
        self.in_flight = Some(query);
        self.forwarder = Some(tokio::spawn(async move {
            let state = subscription.settled().await;
            if sender.send(ListMessage::Posts { seq, state }).is_err() {
                return;
            }
            // Keep observing so background refetches reach the view
            while let Some(state) = subscription.changed().await {
                if sender.send(ListMessage::Posts { seq, state }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Force a refetch of the current query
    pub fn refresh(&mut self) {
        let query = self.current_query();
        let key = super::keys::BlogQueryKeys::posts_list(&query);
        self.service.cache().invalidate(|candidate| candidate == &key);
        self.load();
    }

    /// Next result from a running load or filter option request
    pub async fn next_message(&mut self) -> Option<ListMessage> {
        self.receiver.recv().await
    }

    /// Fold a result into the view. Returns whether the view changed.
    pub fn apply(&mut self, message: ListMessage) -> bool {
        match message {
            ListMessage::Posts { seq, state } => self.apply_posts(seq, state),
            ListMessage::Tags(result) => match result {
                Ok(tags) => {
                    self.view.update(|view| view.tags = tags.as_ref().clone());
                    true
                }
                Err(err) => {
                    warn!("Could not load tags: {}", err);
                    false
                }
            },
            ListMessage::Authors(result) => match result {
                Ok(authors) => {
                    self.view.update(|view| view.authors = authors.as_ref().clone());
                    true
                }
                Err(err) => {
                    warn!("Could not load authors: {}", err);
                    false
                }
            },
        }
    }

    /// Apply messages until the current load has settled
    pub async fn settle(&mut self) -> ListView {
        while self.view.with(|view| view.is_loading()) {
            match self.receiver.recv().await {
                Some(message) => {
                    self.apply(message);
                }
                None => break,
            }
        }
        self.view()
    }

    fn apply_posts(&mut self, seq: u64, state: QueryState<PostPage>) -> bool {
        if seq != self.seq {
            trace!("Dropping result of superseded request {} (current {})", seq, self.seq);
            return false;
        }

        if state.is_fetching() {
            self.view.update(|view| view.is_fetching = true);
            return true;
        }

        match state.status {
            QueryStatus::Success => {
                let Some(page) = state.data else { return false };
                let requested = self.in_flight.as_ref().map_or(page.page, |query| query.page);

                self.pagination.set_total_items(page.total);
                if self.pagination.current_page() != requested {
                    debug!(
                        "Page {} is out of range, loading page {}",
                        requested,
                        self.pagination.current_page()
                    );
                    self.load();
                    return true;
                }

                let pagination = self.pagination.snapshot();
                self.view.update(|view| {
                    view.state = LoadState::Success;
                    view.posts = page.posts.clone();
                    view.total = page.total;
                    view.error = None;
                    view.pagination = pagination;
                    view.is_fetching = false;
                    view.is_stale = state.is_stale;
                    view.last_updated = state.updated_at;
                });
                true
            }
            QueryStatus::Error => {
                let message = state
                    .error
                    .as_ref()
                    .map(banner_message)
                    .unwrap_or_else(|| "Something went wrong.".to_string());
                warn!("Loading posts failed: {}", message);

                self.view.update(|view| {
                    view.state = LoadState::Error;
                    view.error = Some(message);
                    view.is_fetching = false;
                });
                true
            }
            QueryStatus::Pending => false,
        }
    }

    pub fn set_page(&mut self, page: usize) -> bool {
        self.navigate(|pagination| pagination.set_page(page))
    }

    pub fn next_page(&mut self) -> bool {
        self.navigate(PaginationState::next)
    }

    pub fn prev_page(&mut self) -> bool {
        self.navigate(PaginationState::prev)
    }

    pub fn first_page(&mut self) -> bool {
        self.navigate(PaginationState::first)
    }

    pub fn last_page(&mut self) -> bool {
        self.navigate(PaginationState::last)
    }

    /// Go to a page number typed by the user
    pub fn jump_to(&mut self, input: &str) -> bool {
        self.navigate(|pagination| pagination.jump_to(input))
    }

    pub fn set_page_size(&mut self, size: usize) -> Result<(), PaginationError> {
        let before = (self.pagination.current_page(), self.pagination.page_size());
        self.pagination.set_page_size(size)?;
        if before != (self.pagination.current_page(), self.pagination.page_size()) {
            self.load();
        }
        Ok(())
    }

    pub fn cycle_page_size(&mut self, forward: bool) -> Result<usize, PaginationError> {
        let before = self.pagination.page_size();
        let size = self.pagination.cycle_page_size(forward)?;
        if size != before {
            self.load();
        }
        Ok(size)
    }

    pub fn set_search(&mut self, search: Option<String>) -> bool {
        let search = non_blank(search);
        self.change_filters(|filters| filters.search = search)
    }

    pub fn set_tag(&mut self, tag: Option<String>) -> bool {
        let tag = non_blank(tag);
        self.change_filters(|filters| filters.tag = tag)
    }

    pub fn set_author(&mut self, author: Option<String>) -> bool {
        let author = non_blank(author);
        self.change_filters(|filters| filters.author = author)
    }

    /// Select `tag`, or clear it when it is already selected
    pub fn toggle_tag(&mut self, tag: &str) -> bool {
        let next = (self.filters.tag.as_deref() != Some(tag)).then(|| tag.to_string());
        self.set_tag(next)
    }

    /// Select `author`, or clear it when already selected
    pub fn toggle_author(&mut self, author: &str) -> bool {
        let next = (self.filters.author.as_deref() != Some(author)).then(|| author.to_string());
        self.set_author(next)
    }

    /// Step the tag filter through "none" and every known tag
    pub fn cycle_tag(&mut self, forward: bool) -> bool {
        let tags = self.view.with(|view| view.tags.clone());
        let next = cycle_option(&tags, self.filters.tag.as_deref(), forward);
        self.set_tag(next)
    }

    /// Step the author filter through "none" and every known author
    pub fn cycle_author(&mut self, forward: bool) -> bool {
        let authors = self.view.with(|view| view.authors.clone());
        let next = cycle_option(&authors, self.filters.author.as_deref(), forward);
        self.set_author(next)
    }

    pub fn clear_filters(&mut self) -> bool {
        self.change_filters(|filters| *filters = PostFilters::default())
    }

    /// Warm the cache for the page after the current one
    pub fn prefetch_next_page(&self) -> bool {
        if !self.pagination.has_next_page() {
            return false;
        }
        self.service.prefetch_posts(&self.current_query().next_page());
        true
    }

    /// Fetch tag and author lists for the filter controls
    pub fn load_filter_options(&self) {
        let service = self.service.clone();
        let sender = self.sender.clone();
        tokio::spawn(async move {
            let (tags, authors) = tokio::join!(service.tags(), service.authors());
            let _ = sender.send(ListMessage::Tags(tags));
            let _ = sender.send(ListMessage::Authors(authors));
        });
    }

    fn navigate(&mut self, step: impl FnOnce(&mut PaginationState) -> bool) -> bool {
        let moved = step(&mut self.pagination);
        if moved {
            self.load();
        }
        moved
    }

    fn change_filters(&mut self, change: impl FnOnce(&mut PostFilters)) -> bool {
        let before = self.filters.clone();
        change(&mut self.filters);
        if self.filters == before {
            return false;
        }
        self.pagination.first();
        self.load();
        true
    }
}

impl Drop for ListController {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

impl std::fmt::Debug for ListController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListController")
            .field("pagination", &self.pagination)
            .field("filters", &self.filters)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Error banner text for a failed list load
fn banner_message(err: &FetchError) -> String {
    match err {
        FetchError::Transport(_) | FetchError::Aborted(_) => {
            "Failed to fetch blog posts. Please try again.".to_string()
        }
        FetchError::NotFound(what) => format!("{} could not be found.", what),
        other => other.to_string(),
    }
}

fn cycle_option(options: &[String], current: Option<&str>, forward: bool) -> Option<String> {
    if options.is_empty() {
        return None;
    }
    let position = current.and_then(|c| options.iter().position(|o| o == c));
    let next = match (position, forward) {
        (None, true) => Some(0),
        (None, false) => Some(options.len() - 1),
        (Some(i), true) if i + 1 < options.len() => Some(i + 1),
        (Some(i), false) if i > 0 => Some(i - 1),
        (Some(_), _) => None,
    };
    next.map(|i| options[i].clone())
}
