//! `folio list`: print one page of posts

use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;

use crate::app::App;
use crate::blog::{BlogPost, PostFilters, PostPage, PostQuery};
use crate::pagination::{PageItem, PaginationState, PaginationView};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Print one page of posts
#[derive(Debug, Args)]
pub struct ListCommand {
    /// Page to show (1-based); clamped to the last page
    #[arg(short, long, default_value = "1")]
    pub page: usize,

    /// Posts per page; defaults to the configured page size
    #[arg(short = 's', long)]
    pub page_size: Option<usize>,

    /// Case-insensitive search over title, excerpt and content
    #[arg(short = 'q', long)]
    pub search: Option<String>,

    /// Only posts carrying this tag
    #[arg(short, long)]
    pub tag: Option<String>,

    /// Only posts by this author
    #[arg(short, long)]
    pub author: Option<String>,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Serialize)]
struct ListOutput<'a> {
    posts: &'a [BlogPost],
    pagination: &'a PaginationView,
    filters: &'a PostFilters,
}

impl ListCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        let mut pagination = PaginationState::with_config(app.config().pagination_config());
        if let Some(size) = self.page_size {
            pagination.set_page_size(size)?;
        }

        let filters = PostFilters::new(self.search.clone(), self.tag.clone(), self.author.clone());
        let mut query = PostQuery::new(self.page.max(1), pagination.page_size())
            .with_filters(filters.clone());

        let mut page = app.service().posts(&query).await?;
        pagination.set_total_items(page.total);
        if query.page > pagination.total_pages() {
            query.page = pagination.total_pages();
            page = app.service().posts(&query).await?;
            pagination.set_total_items(page.total);
        }
        pagination.set_page(query.page);

        let view = pagination.snapshot();
        match self.format {
            OutputFormat::Json => {
                let output = ListOutput {
                    posts: &page.posts,
                    pagination: &view,
                    filters: &filters,
                };
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => print!("{}", render_text(&page, &view, &filters)),
        }
        Ok(())
    }
}

fn render_text(page: &PostPage, view: &PaginationView, filters: &PostFilters) -> String {
    let mut out = String::new();

    if !filters.is_empty() {
        out.push_str(&format!("Filters: {}\n\n", describe_filters(filters)));
    }

    if page.posts.is_empty() {
        out.push_str("No posts found.\n");
        return out;
    }

    for post in &page.posts {
        out.push_str(&format!(
            "{}  {}\n",
            post.published_at.format("%Y-%m-%d"),
            post.title
        ));
        out.push_str(&format!(
            "            by {} | {} min read | {}\n",
            post.author,
            post.reading_time,
            post.tags.join(", ")
        ));
        out.push_str(&format!("            {}\n\n", post.excerpt));
    }

    out.push_str(&format!(
        "Showing {}-{} of {} posts\n",
        view.start_item, view.end_item, view.total_items
    ));
    out.push_str(&page_bar(view));
    out.push('\n');
    out
}

/// `< 1 ... 4 [5] 6 ... 10 >`, with the arrows dropped at either end
pub(crate) fn page_bar(view: &PaginationView) -> String {
    let mut parts = Vec::with_capacity(view.pages.len() + 2);
    if view.has_prev_page {
        parts.push("<".to_string());
    }
    for item in &view.pages {
        parts.push(match item {
            PageItem::Page(n) if *n == view.current_page => format!("[{}]", n),
            PageItem::Page(n) => n.to_string(),
            PageItem::Ellipsis => "...".to_string(),
        });
    }
    if view.has_next_page {
        parts.push(">".to_string());
    }
    parts.join(" ")
}

pub(crate) fn describe_filters(filters: &PostFilters) -> String {
    let mut parts = Vec::new();
    if let Some(search) = &filters.search {
        parts.push(format!("search \"{}\"", search));
    }
    if let Some(tag) = &filters.tag {
        parts.push(format!("tag {}", tag));
    }
    if let Some(author) = &filters.author {
        parts.push(format!("author {}", author));
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagination::PaginationConfig;

    fn view(current: usize, total_items: usize) -> PaginationView {
        let mut state = PaginationState::with_config(PaginationConfig {
            max_visible_pages: 5,
            ..PaginationConfig::default()
        });
        state.set_total_items(total_items);
        state.set_page(current);
        state.snapshot()
    }

    #[test]
    fn test_page_bar_marks_current_page() {
        assert_eq!(page_bar(&view(1, 30)), "[1] 2 3 >");
        assert_eq!(page_bar(&view(3, 30)), "< 1 2 [3]");
    }

    #[test]
    fn test_page_bar_collapses_long_ranges() {
        let bar = page_bar(&view(10, 200));
        assert!(bar.starts_with("< 1 ..."));
        assert!(bar.contains("[10]"));
        assert!(bar.ends_with("... 20 >"));
    }

    #[test]
    fn test_render_text_empty_page() {
        let filters = PostFilters::new(Some("nothing".into()), None, None);
        let page = PostPage {
            posts: Vec::new(),
            total: 0,
            page: 1,
            page_size: 10,
            has_next: false,
            has_prev: false,
        };
        let text = render_text(&page, &view(1, 0), &filters);
        assert!(text.contains("Filters: search \"nothing\""));
        assert!(text.contains("No posts found."));
    }

    #[test]
    fn test_describe_filters() {
        let filters = PostFilters::new(None, Some("Rust".into()), Some("Leanne Graham".into()));
        assert_eq!(describe_filters(&filters), "tag Rust, author Leanne Graham");
    }
}
