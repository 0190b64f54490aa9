//! Query key factory for blog resources
//!
//! Keys share a common hierarchy so a write can invalidate a whole family:
//!
//! ```text
//! blog
//! ├── posts
//! │   ├── list?page=..&page_size=..&search=..&tag=..&author=..
//! │   └── <slug>
//! ├── tags
//! └── authors
//! ```

use super::model::PostQuery;
use crate::query::QueryKey;

pub struct BlogQueryKeys;

impl BlogQueryKeys {
    pub const ALL: &'static str = "blog";
    pub const POSTS: &'static str = "blog/posts";

    pub fn posts_list(query: &PostQuery) -> QueryKey {
        QueryKey::paged(format!("{}/list", Self::POSTS), query.page, query.page_size)
            .with_optional_filter("search", query.filters.search.as_deref())
            .with_optional_filter("tag", query.filters.tag.as_deref())
            .with_optional_filter("author", query.filters.author.as_deref())
    }

    pub fn post(slug: &str) -> QueryKey {
        QueryKey::new(format!("{}/{}", Self::POSTS, slug))
    }

    pub fn tags() -> QueryKey {
        QueryKey::new(format!("{}/tags", Self::ALL))
    }

    pub fn authors() -> QueryKey {
        QueryKey::new(format!("{}/authors", Self::ALL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blog::model::PostFilters;

    #[test]
    fn test_list_keys_follow_query() {
        let plain = BlogQueryKeys::posts_list(&PostQuery::new(1, 10));
        let searched = BlogQueryKeys::posts_list(
            &PostQuery::new(1, 10).with_filters(PostFilters::new(Some("rust".into()), None, None)),
        );
        let blank = BlogQueryKeys::posts_list(
            &PostQuery::new(1, 10).with_filters(PostFilters::new(Some(" ".into()), None, None)),
        );

        assert_ne!(plain, searched);
        assert_eq!(plain, blank);
        assert_eq!(searched.filter("search"), Some("rust"));
    }

    #[test]
    fn test_posts_prefix_covers_lists_and_single_posts() {
        assert!(BlogQueryKeys::posts_list(&PostQuery::new(2, 5)).matches_prefix(BlogQueryKeys::POSTS));
        assert!(BlogQueryKeys::post("hello-world").matches_prefix(BlogQueryKeys::POSTS));
        assert!(!BlogQueryKeys::tags().matches_prefix(BlogQueryKeys::POSTS));
        assert!(BlogQueryKeys::authors().matches_prefix(BlogQueryKeys::ALL));
    }
}
