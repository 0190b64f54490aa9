use crate::blog::{BlogPost, ListController, ListMessage, ListView, LoadState};
use crate::pagination::PageItem;
use crate::storage::ThemePreference;
use crate::utils::Subscription;
use crate::tui::{keys::{Action, KeyMap}, styles::Theme, Frame};
use crossterm::event::{KeyCode, KeyEvent};
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::Modifier;
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, Paragraph, Wrap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptKind {
    Search,
    GotoPage,
}

/// Single-line input shown in the status bar
#[derive(Debug, Clone)]
struct Prompt {
    kind: PromptKind,
    buffer: String,
}

impl Prompt {
    fn label(&self) -> &'static str {
        match self.kind {
            PromptKind::Search => "Search: ",
            PromptKind::GotoPage => "Go to page: ",
        }
    }
}

/// The post list screen
pub struct Browser {
    controller: ListController,
    preference: ThemePreference,
    theme: Theme,
    key_map: KeyMap,
    prompt: Option<Prompt>,
    show_help: bool,
    status_message: Option<String>,
    prefetch_next: bool,
    should_quit: bool,
    /// Set by the view signal whenever the list view changes
    dirty: Arc<AtomicBool>,
    _view_subscription: Subscription,
}

impl Browser {
    pub fn new(controller: ListController, preference: ThemePreference, prefetch_next: bool) -> Self {
        let theme = Theme::for_appearance(preference.appearance());
        let dirty = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&dirty);
        let view_subscription = controller
            .signal()
            .subscribe(move |_| flag.store(true, Ordering::Release));

        Self {
            controller,
            preference,
            theme,
            key_map: KeyMap::default(),
            prompt: None,
            show_help: false,
            status_message: None,
            prefetch_next,
            should_quit: false,
            dirty,
            _view_subscription: view_subscription,
        }
    }

    /// Whether the list view changed since the last call
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Kick off the first page load and the filter option lists
    pub fn start(&mut self) {
        self.controller.load();
        self.controller.load_filter_options();
    }

    pub fn should_quit(&self) -> bool {
        self.should_quit
    }

    pub async fn next_message(&mut self) -> Option<ListMessage> {
        self.controller.next_message().await
    }

    /// Fold a finished fetch into the view
    pub fn apply(&mut self, message: ListMessage) {
        let changed = self.controller.apply(message);
        if changed && self.prefetch_next && self.controller.view().state == LoadState::Success {
            self.controller.prefetch_next_page();
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        if self.prompt.is_some() {
            self.handle_prompt_key(key);
            return;
        }

        if self.show_help && key.code == KeyCode::Esc {
            self.show_help = false;
            return;
        }

        if let Some(action) = self.key_map.action(&key) {
            self.status_message = None;
            self.perform(action);
        }
    }

    fn perform(&mut self, action: Action) {
        debug!("Key action {:?}", action);
        match action {
            Action::Quit => self.should_quit = true,
            Action::Help => self.show_help = !self.show_help,
            Action::NextPage => {
                self.controller.next_page();
            }
            Action::PrevPage => {
                self.controller.prev_page();
            }
            Action::FirstPage => {
                self.controller.first_page();
            }
            Action::LastPage => {
                self.controller.last_page();
            }
            Action::GotoPage => self.open_prompt(PromptKind::GotoPage, String::new()),
            Action::Search => {
                let current = self.controller.filters().search.clone().unwrap_or_default();
                self.open_prompt(PromptKind::Search, current);
            }
            Action::NextTag | Action::PrevTag => {
                if !self.controller.cycle_tag(action == Action::NextTag) {
                    self.status_message = Some("No tags available yet".to_string());
                }
            }
            Action::NextAuthor | Action::PrevAuthor => {
                if !self.controller.cycle_author(action == Action::NextAuthor) {
                    self.status_message = Some("No authors available yet".to_string());
                }
            }
            Action::ClearFilters => {
                self.controller.clear_filters();
            }
            Action::LargerPages | Action::SmallerPages => {
                match self.controller.cycle_page_size(action == Action::LargerPages) {
                    Ok(size) => self.status_message = Some(format!("{} posts per page", size)),
                    Err(err) => self.status_message = Some(err.to_string()),
                }
            }
            Action::Refresh => {
                self.controller.refresh();
                self.status_message = Some("Refreshing...".to_string());
            }
            Action::Prefetch => {
                let message = if self.controller.prefetch_next_page() {
                    format!("Prefetched page {}", self.controller.pagination().current_page() + 1)
                } else {
                    "Already on the last page".to_string()
                };
                self.status_message = Some(message);
            }
            Action::ToggleTheme => match self.preference.toggle() {
                Ok(mode) => {
                    self.theme = Theme::for_appearance(mode.resolve());
                    self.status_message = Some(format!("Theme: {}", mode));
                }
                Err(err) => {
                    warn!("Could not save theme: {}", err);
                    self.status_message = Some("Could not save theme".to_string());
                }
            },
        }
    }

    fn open_prompt(&mut self, kind: PromptKind, buffer: String) {
        self.prompt = Some(Prompt { kind, buffer });
    }

    fn handle_prompt_key(&mut self, key: KeyEvent) {
        let Some(prompt) = self.prompt.as_mut() else { return };
        match key.code {
            KeyCode::Esc => self.prompt = None,
            KeyCode::Backspace => {
                prompt.buffer.pop();
            }
            KeyCode::Char(c) if prompt.kind == PromptKind::GotoPage && !c.is_ascii_digit() => {}
            KeyCode::Char(c) => prompt.buffer.push(c),
            KeyCode::Enter => {
                if let Some(prompt) = self.prompt.take() {
                    self.submit_prompt(prompt);
                }
            }
            _ => {}
        }
    }

    fn submit_prompt(&mut self, prompt: Prompt) {
        match prompt.kind {
            // `tag:NAME` and `author:NAME` toggle a filter instead of searching
            PromptKind::Search => {
                let input = prompt.buffer.trim();
                if let Some(tag) = input.strip_prefix("tag:") {
                    self.controller.toggle_tag(tag.trim());
                } else if let Some(author) = input.strip_prefix("author:") {
                    self.controller.toggle_author(author.trim());
                } else {
                    self.controller.set_search(Some(prompt.buffer));
                }
            }
            PromptKind::GotoPage => {
                let current = self.controller.pagination().current_page();
                if !self.controller.jump_to(&prompt.buffer)
                    && prompt.buffer.trim() != current.to_string()
                {
                    self.status_message = Some(format!(
                        "Pages run from 1 to {}",
                        self.controller.pagination().total_pages()
                    ));
                }
            }
        }
    }

    /// Render the application UI
    pub fn render(&self, frame: &mut Frame) {
        let view = self.controller.view();
        let area = frame.size();
        frame.render_widget(Block::default().style(self.theme.base_style()), area);

        let banner_height = if view.error.is_some() { 1 } else { 0 };
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),             // Header and filters
                Constraint::Length(banner_height), // Error banner
                Constraint::Min(3),                // Posts
                Constraint::Length(1),             // Page bar
                Constraint::Length(1),             // Status bar
            ])
            .split(area);

        self.render_header(frame, chunks[0], &view);
        if let Some(error) = &view.error {
            let banner = Paragraph::new(format!(" {} Press r to retry.", error))
                .style(self.theme.error_style());
            frame.render_widget(banner, chunks[1]);
        }
        self.render_posts(frame, chunks[2], &view);
        self.render_page_bar(frame, chunks[3], &view);
        self.render_status_bar(frame, chunks[4], &view);

        if self.show_help {
            self.render_help_overlay(frame);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect, view: &ListView) {
        let filters = &view.filters;
        let mut spans = vec![Span::styled("Search ", self.theme.dim_style())];
        spans.push(filter_span(filters.search.as_deref(), &self.theme));
        spans.push(Span::styled("  Tag ", self.theme.dim_style()));
        spans.push(filter_span(filters.tag.as_deref(), &self.theme));
        spans.push(Span::styled("  Author ", self.theme.dim_style()));
        spans.push(filter_span(filters.author.as_deref(), &self.theme));

        if view.is_fetching && !view.posts.is_empty() {
            spans.push(Span::styled("  updating...", self.theme.warning_style()));
        } else if view.is_stale {
            spans.push(Span::styled("  stale", self.theme.warning_style()));
        }

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(self.theme.focused_border_style())
            .title(Span::styled(
                " Folio ",
                self.theme.title_style().fg(self.theme.primary),
            ));
        frame.render_widget(Paragraph::new(Line::from(spans)).block(block), area);
    }

    fn render_posts(&self, frame: &mut Frame, area: Rect, view: &ListView) {
        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(self.theme.border_style());

        if view.posts.is_empty() {
            let (text, style) = match view.state {
                LoadState::Idle | LoadState::Loading => ("Loading posts...", self.theme.placeholder_style()),
                LoadState::Error => ("Could not load posts.", self.theme.error_style()),
                LoadState::Success => ("No posts found.", self.theme.placeholder_style()),
            };
            let empty = Paragraph::new(text)
                .style(style)
                .block(block)
                .wrap(Wrap { trim: true });
            frame.render_widget(empty, area);
            return;
        }

        let items: Vec<ListItem> = view
            .posts
            .iter()
            .map(|post| self.post_item(post))
            .collect();
        frame.render_widget(List::new(items).block(block), area);
    }

    fn post_item(&self, post: &BlogPost) -> ListItem<'static> {
        let title = Line::from(Span::styled(post.title.clone(), self.theme.title_style()));

        let mut meta = vec![Span::styled(
            format!(
                "{} | {} | {} min read ",
                post.published_at.format("%b %-d, %Y"),
                post.author,
                post.reading_time
            ),
            self.theme.dim_style(),
        )];
        for tag in &post.tags {
            meta.push(Span::styled(format!(" #{}", tag), self.theme.tag_style()));
        }

        let excerpt = Line::from(Span::styled(post.excerpt.clone(), self.theme.text_style()));
        ListItem::new(vec![title, Line::from(meta), excerpt, Line::default()])
    }

    fn render_page_bar(&self, frame: &mut Frame, area: Rect, view: &ListView) {
        let pagination = &view.pagination;
        let enabled = |on: bool| {
            if on {
                self.theme.text_style()
            } else {
                self.theme.dim_style().add_modifier(Modifier::DIM)
            }
        };

        let mut spans = vec![Span::styled("< Prev ", enabled(pagination.has_prev_page))];
        for item in &pagination.pages {
            spans.push(match item {
                PageItem::Page(n) if *n == pagination.current_page => {
                    Span::styled(format!(" {} ", n), self.theme.selection_style())
                }
                PageItem::Page(n) => Span::styled(format!(" {} ", n), self.theme.text_style()),
                PageItem::Ellipsis => Span::styled(" ... ", self.theme.dim_style()),
            });
        }
        spans.push(Span::styled(" Next >", enabled(pagination.has_next_page)));
        spans.push(Span::styled(
            format!(
                "   Showing {}-{} of {} | {} per page",
                pagination.start_item, pagination.end_item, pagination.total_items, pagination.page_size
            ),
            self.theme.dim_style(),
        ));

        frame.render_widget(Paragraph::new(Line::from(spans)), area);
    }

    fn render_status_bar(&self, frame: &mut Frame, area: Rect, view: &ListView) {
        let text = if let Some(prompt) = &self.prompt {
            format!("{}{}_", prompt.label(), prompt.buffer)
        } else if let Some(message) = &self.status_message {
            message.clone()
        } else if view.is_loading() {
            "Loading...".to_string()
        } else {
            let updated = view
                .last_updated
                .map(|at| format!("Updated {} | ", at.format("%H:%M:%S")))
                .unwrap_or_default();
            format!("{}? help | q quit", updated)
        };

        frame.render_widget(Paragraph::new(text).style(self.theme.status_bar_style()), area);
    }

    fn render_help_overlay(&self, frame: &mut Frame) {
        let help_area = centered_rect(60, 70, frame.size());

        let lines: Vec<Line> = self
            .key_map
            .help_entries()
            .into_iter()
            .map(|(keys, description)| {
                Line::from(vec![
                    Span::styled(format!("{:>8}  ", keys), self.theme.tag_style()),
                    Span::styled(description, self.theme.text_style()),
                ])
            })
            .collect();

        let help_block = Block::default()
            .borders(Borders::ALL)
            .title("Help")
            .style(self.theme.help_style());

        frame.render_widget(Clear, help_area);
        frame.render_widget(Paragraph::new(lines).block(help_block), help_area);
    }
}

fn filter_span(value: Option<&str>, theme: &Theme) -> Span<'static> {
    match value {
        Some(value) => Span::styled(value.to_string(), theme.tag_style()),
        None => Span::styled("any", theme.placeholder_style()),
    }
}

/// Create a centered rectangle with given percentage of the screen
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
