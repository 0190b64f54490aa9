//! Blog data access through the query cache

use super::keys::BlogQueryKeys;
use super::model::{BlogPost, PostDraft, PostPage, PostQuery};
use super::source::BlogSource;
use crate::query::{FetchError, FetchResult, QueryCache, QueryOptions, QuerySubscription, RetryPolicy};
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Query options per family of blog queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryPresets {
    pub posts: QueryOptions,
    pub post: QueryOptions,
    /// Tags and authors change rarely
    pub static_data: QueryOptions,
}

impl Default for QueryPresets {
    fn default() -> Self {
        let retry = RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30));
        Self {
            posts: QueryOptions::default()
                .with_stale_time(Duration::from_secs(5 * 60))
                .with_gc_time(Duration::from_secs(10 * 60))
                .with_retry(retry.clone()),
            post: QueryOptions::default()
                .with_stale_time(Duration::from_secs(10 * 60))
                .with_gc_time(Duration::from_secs(15 * 60))
                .with_retry(retry.clone()),
            static_data: QueryOptions::default()
                .with_stale_time(Duration::from_secs(30 * 60))
                .with_gc_time(Duration::from_secs(60 * 60))
                .with_retry(RetryPolicy { retries: 2, ..retry }),
        }
    }
}

impl QueryPresets {
    /// Apply one retry policy to every family
    #[cfg(test)]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.posts.retry = retry.clone();
        self.post.retry = retry.clone();
        self.static_data.retry = RetryPolicy {
            retries: retry.retries.min(self.static_data.retry.retries),
            ..retry
        };
        self
    }
}

type Fetcher<T> = Box<dyn Fn() -> BoxFuture<'static, FetchResult<T>> + Send + Sync>;

/// Blog queries and mutations bound to a source and a shared cache
#[derive(Clone)]
pub struct BlogService {
    source: Arc<dyn BlogSource>,
    cache: QueryCache,
    presets: Arc<QueryPresets>,
}

impl BlogService {
    pub fn new(source: Arc<dyn BlogSource>, cache: QueryCache, presets: QueryPresets) -> Self {
        Self {
            source,
            cache,
            presets: Arc::new(presets),
        }
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub fn presets(&self) -> &QueryPresets {
        &self.presets
    }

    /// One page of posts
    pub async fn posts(&self, query: &PostQuery) -> FetchResult<Arc<PostPage>> {
        let key = BlogQueryKeys::posts_list(query);
        self.cache
            .resolve(&key, self.list_fetcher(query), &self.presets.posts)
            .await
    }

    /// Observe one page of posts
    pub fn watch_posts(&self, query: &PostQuery) -> QuerySubscription<PostPage> {
        let key = BlogQueryKeys::posts_list(query);
        self.cache
            .subscribe(&key, self.list_fetcher(query), &self.presets.posts)
    }

    pub fn prefetch_posts(&self, query: &PostQuery) {
        let key = BlogQueryKeys::posts_list(query);
        debug!("Prefetching {}", key);
        self.cache
            .prefetch(&key, self.list_fetcher(query), &self.presets.posts);
    }

    /// A single post; an empty slug is rejected without a request
    pub async fn post(&self, slug: &str) -> FetchResult<Arc<BlogPost>> {
        let slug = slug.trim();
        if slug.is_empty() {
            return Err(FetchError::InvalidArgument("slug must not be empty".into()));
        }
        self.cache
            .resolve(&BlogQueryKeys::post(slug), self.post_fetcher(slug), &self.presets.post)
            .await
    }

    pub fn prefetch_post(&self, slug: &str) {
        let slug = slug.trim();
        if slug.is_empty() {
            return;
        }
        self.cache
            .prefetch(&BlogQueryKeys::post(slug), self.post_fetcher(slug), &self.presets.post);
    }

    pub async fn tags(&self) -> FetchResult<Arc<Vec<String>>> {
        let source = Arc::clone(&self.source);
        let fetcher: Fetcher<Vec<String>> = Box::new(move || {
            let source = Arc::clone(&source);
            async move { source.fetch_tags().await }.boxed()
        });
        self.cache
            .resolve(&BlogQueryKeys::tags(), fetcher, &self.presets.static_data)
            .await
    }

    pub async fn authors(&self) -> FetchResult<Arc<Vec<String>>> {
        let source = Arc::clone(&self.source);
        let fetcher: Fetcher<Vec<String>> = Box::new(move || {
            let source = Arc::clone(&source);
            async move { source.fetch_authors().await }.boxed()
        });
        self.cache
            .resolve(&BlogQueryKeys::authors(), fetcher, &self.presets.static_data)
            .await
    }

    /// Create a post, mark every post query stale and cache the new post
    pub async fn create_post(&self, draft: PostDraft) -> FetchResult<BlogPost> {
        let post = self.source.create_post(draft).await.map_err(|err| {
            error!("Failed to create blog post: {}", err);
            err
        })?;
        self.cache.invalidate_prefix(BlogQueryKeys::POSTS);
        self.store_post(&post);
        Ok(post)
    }

    /// Update a post, mark every post query stale and cache the new version
    pub async fn update_post(&self, id: &str, draft: PostDraft) -> FetchResult<BlogPost> {
        let post = self.source.update_post(id, draft).await.map_err(|err| {
            error!("Failed to update blog post: {}", err);
            err
        })?;
        self.cache.invalidate_prefix(BlogQueryKeys::POSTS);
        self.store_post(&post);
        Ok(post)
    }

    /// Delete a post, then mark every post query stale
    pub async fn delete_post(&self, id: &str) -> FetchResult<()> {
        self.source.delete_post(id).await.map_err(|err| {
            error!("Failed to delete blog post: {}", err);
            err
        })?;
        self.cache.invalidate_prefix(BlogQueryKeys::POSTS);
        Ok(())
    }

    fn store_post(&self, post: &BlogPost) {
        let key = BlogQueryKeys::post(&post.slug);
        if let Err(err) = self.cache.set_query_data(&key, post.clone(), &self.presets.post) {
            warn!("Could not cache {}: {}", key, err);
        }
    }

    fn list_fetcher(&self, query: &PostQuery) -> Fetcher<PostPage> {
        let source = Arc::clone(&self.source);
        let query = query.clone();
        Box::new(move || {
            let source = Arc::clone(&source);
            let query = query.clone();
            async move { source.fetch_list(&query).await }.boxed()
        })
    }

    fn post_fetcher(&self, slug: &str) -> Fetcher<BlogPost> {
        let source = Arc::clone(&self.source);
        let slug = slug.to_string();
        Box::new(move || {
            let source = Arc::clone(&source);
            let slug = slug.clone();
            async move { source.fetch_post(&slug).await }.boxed()
        })
    }
}

impl std::fmt::Debug for BlogService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlogService")
            .field("cache", &self.cache)
            .field("presets", &self.presets)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blog::source::{SimulatedBlogSource, SimulatedSourceConfig};

    fn service() -> (BlogService, Arc<SimulatedBlogSource>) {
        let source = Arc::new(SimulatedBlogSource::new(SimulatedSourceConfig::instant(47)));
        let service = BlogService::new(
            source.clone(),
            QueryCache::default(),
            QueryPresets::default().with_retry(RetryPolicy::none()),
        );
        (service, source)
    }

    #[test]
    fn test_default_presets() {
        let presets = QueryPresets::default();
        assert_eq!(presets.posts.stale_time, Duration::from_secs(300));
        assert_eq!(presets.post.gc_time, Duration::from_secs(900));
        assert_eq!(presets.static_data.retry.retries, 2);
        assert_eq!(presets.posts.retry.delay_for(10), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_repeated_list_queries_hit_cache() {
        let (service, source) = service();
        let query = PostQuery::new(1, 10);

        let first = service.posts(&query).await.unwrap();
        let second = service.posts(&query).await.unwrap();

        assert_eq!(first.total, 47);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_prefetched_page_needs_no_request() {
        let (service, source) = service();
        let query = PostQuery::new(1, 10);

        service.prefetch_posts(&query.next_page());
        let page_two = service.posts(&query.next_page()).await.unwrap();

        assert_eq!(page_two.page, 2);
        assert_eq!(source.request_count(), 1);
    }

    #[tokio::test]
    async fn test_writes_invalidate_post_queries_only() {
        let (service, source) = service();
        let query = PostQuery::new(1, 10);

        service.posts(&query).await.unwrap();
        service.tags().await.unwrap();
        assert_eq!(source.request_count(), 2);

        let created = service
            .create_post(PostDraft {
                title: "Fresh Post".into(),
                content: "New content".into(),
                author: "Leanne Graham".into(),
                published: true,
                ..PostDraft::default()
            })
            .await
            .unwrap();

        let refreshed = service.posts(&query).await.unwrap();
        assert_eq!(refreshed.total, 48);
        service.tags().await.unwrap();
        assert_eq!(source.request_count(), 4);

        let cached = service
            .cache()
            .get_query_data::<BlogPost>(&BlogQueryKeys::post(&created.slug));
        assert_eq!(cached.map(|post| post.id.clone()), Some(created.id.clone()));
        assert_eq!(service.post(&created.slug).await.unwrap().title, "Fresh Post");
        assert_eq!(source.request_count(), 4);

        service.delete_post(&created.id).await.unwrap();
        assert_eq!(service.posts(&query).await.unwrap().total, 47);
    }

    #[tokio::test]
    async fn test_single_post_lookup() {
        let (service, _) = service();
        let listed = service.posts(&PostQuery::new(1, 1)).await.unwrap();
        let slug = &listed.posts[0].slug;

        assert_eq!(&service.post(slug).await.unwrap().slug, slug);
        assert!(matches!(service.post("  ").await, Err(FetchError::InvalidArgument(_))));
        assert!(matches!(service.post("missing").await, Err(FetchError::NotFound(_))));
    }
}
