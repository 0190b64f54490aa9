//! Blog domain types

use crate::utils::text::contains_ignore_case;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published (or draft) blog post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub excerpt: String,
    pub content: String,
    pub author: String,
    pub published_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    /// Estimated reading time in minutes
    pub reading_time: u32,
    pub published: bool,
}

impl BlogPost {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Fields supplied when creating or updating a post
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub author: String,
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    pub published: bool,
}

/// One page of a post listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPage {
    pub posts: Vec<BlogPost>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Search, tag and author constraints on a post listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

impl PostFilters {
    /// Build filters, treating blank values as unset
    pub fn new(search: Option<String>, tag: Option<String>, author: Option<String>) -> Self {
        Self {
            search: non_blank(search),
            tag: non_blank(tag),
            author: non_blank(author),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_none() && self.tag.is_none() && self.author.is_none()
    }

    /// Whether `post` satisfies every set filter. Search is case-insensitive
    /// over title, excerpt and content.
    pub fn matches(&self, post: &BlogPost) -> bool {
        if let Some(tag) = &self.tag {
            if !post.has_tag(tag) {
                return false;
            }
        }
        if let Some(author) = &self.author {
            if &post.author != author {
                return false;
            }
        }
        if let Some(search) = &self.search {
            return [&post.title, &post.excerpt, &post.content]
                .iter()
                .any(|field| contains_ignore_case(field, search));
        }
        true
    }
}

pub(crate) fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parameters of one list request
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostQuery {
    pub page: usize,
    pub page_size: usize,
    #[serde(flatten)]
    pub filters: PostFilters,
}

impl PostQuery {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size,
            filters: PostFilters::default(),
        }
    }

    pub fn with_filters(mut self, filters: PostFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn next_page(&self) -> Self {
        Self {
            page: self.page + 1,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(title: &str, author: &str, tags: &[&str]) -> BlogPost {
        let now = Utc::now();
        BlogPost {
            id: "1".into(),
            title: title.into(),
            slug: crate::utils::text::slugify(title),
            excerpt: String::new(),
            content: "Body text about Signals".into(),
            author: author.into(),
            published_at: now,
            updated_at: now,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            cover_image: None,
            reading_time: 1,
            published: true,
        }
    }

    #[test]
    fn test_blank_filters_are_unset() {
        let filters = PostFilters::new(Some("  ".into()), Some(String::new()), None);
        assert!(filters.is_empty());
    }

    #[test]
    fn test_filter_matching() {
        let p = post("Rust Ownership", "Leanne Graham", &["Tutorial", "Guide"]);

        assert!(PostFilters::default().matches(&p));
        assert!(PostFilters::new(Some("ownership".into()), None, None).matches(&p));
        assert!(PostFilters::new(Some("SIGNALS".into()), None, None).matches(&p));
        assert!(PostFilters::new(None, Some("Guide".into()), None).matches(&p));
        assert!(!PostFilters::new(None, Some("guide".into()), None).matches(&p));
        assert!(!PostFilters::new(None, None, Some("Ervin Howell".into())).matches(&p));
        assert!(!PostFilters::new(Some("absent".into()), Some("Guide".into()), None).matches(&p));
    }

    #[test]
    fn test_post_serializes_camel_case() {
        let json = serde_json::to_value(post("Hello", "Ann", &[])).unwrap();
        assert!(json.get("readingTime").is_some());
        assert!(json.get("publishedAt").is_some());
        assert!(json.get("coverImage").is_none());
    }
}
