//! Remote post sources
//!
//! [`BlogSource`] is the seam between the query layer and wherever posts come
//! from. [`SimulatedBlogSource`] stands in for a remote list endpoint: it
//! serves a generated catalog with artificial latency and injected failures.

use super::model::{BlogPost, PostDraft, PostPage, PostQuery};
use crate::query::{FetchError, FetchResult};
use crate::utils::text::{reading_time, slugify, truncate};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use rand::Rng;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, trace};

/// Source of blog data
#[async_trait]
pub trait BlogSource: Send + Sync {
    /// One page of posts matching the query's filters, newest first
    async fn fetch_list(&self, query: &PostQuery) -> FetchResult<PostPage>;

    /// A single post by slug (or id)
    async fn fetch_post(&self, slug: &str) -> FetchResult<BlogPost>;

    async fn fetch_tags(&self) -> FetchResult<Vec<String>>;

    async fn fetch_authors(&self) -> FetchResult<Vec<String>>;

    async fn create_post(&self, draft: PostDraft) -> FetchResult<BlogPost>;

    async fn update_post(&self, id: &str, draft: PostDraft) -> FetchResult<BlogPost>;

    async fn delete_post(&self, id: &str) -> FetchResult<()>;
}

pub const TAGS: &[&str] = &[
    "Angular",
    "TypeScript",
    "JavaScript",
    "Web Development",
    "Frontend",
    "Backend",
    "RxJS",
    "Signals",
    "Performance",
    "Architecture",
    "Best Practices",
    "Tutorial",
    "Guide",
];

pub const AUTHORS: &[&str] = &[
    "Leanne Graham",
    "Ervin Howell",
    "Clementine Bauch",
    "Patricia Lebsack",
    "Chelsey Dietrich",
    "Dennis Schulist",
    "Kurtis Weissnat",
    "Nicholas Runolfsdottir",
    "Glenna Reichert",
    "Clementina DuBuque",
];

const TOPICS: &[&str] = &[
    "Getting Started with",
    "Deep Dive into",
    "Testing Strategies for",
    "Common Pitfalls in",
    "Scaling",
    "Refactoring Toward",
    "A Practical Guide to",
    "Debugging",
];

const SUBJECTS: &[&str] = &[
    "Reactive State",
    "Pagination",
    "Query Caching",
    "Component Design",
    "Error Boundaries",
    "Lazy Loading",
    "Server Communication",
];

/// Behaviour of the simulated endpoint
#[derive(Debug, Clone)]
pub struct SimulatedSourceConfig {
    /// Number of generated posts
    pub catalog_size: usize,
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability in `[0, 1]` that a request fails with a transport error
    pub failure_rate: f64,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            catalog_size: 47,
            min_latency: Duration::from_millis(150),
            max_latency: Duration::from_millis(450),
            failure_rate: 0.0,
        }
    }
}

impl SimulatedSourceConfig {
    /// No latency, no failures
    pub fn instant(catalog_size: usize) -> Self {
        Self {
            catalog_size,
            min_latency: Duration::ZERO,
            max_latency: Duration::ZERO,
            failure_rate: 0.0,
        }
    }
}

/// In-process stand-in for a remote blog API
#[derive(Debug)]
pub struct SimulatedBlogSource {
    posts: RwLock<Vec<BlogPost>>,
    config: SimulatedSourceConfig,
    requests: AtomicUsize,
}

impl SimulatedBlogSource {
    pub fn new(config: SimulatedSourceConfig) -> Self {
        let posts = generate_catalog(config.catalog_size);
        debug!("Simulated source ready with {} posts", posts.len());
        Self {
            posts: RwLock::new(posts),
            config,
            requests: AtomicUsize::new(0),
        }
    }

    /// Number of requests served so far, failed ones included
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BlogPost>> {
        self.posts.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<BlogPost>> {
        self.posts.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn simulate_network(&self, operation: &str) -> FetchResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        let (delay, fail) = {
            let mut rng = rand::thread_rng();
            let delay = if self.config.max_latency > self.config.min_latency {
                rng.gen_range(self.config.min_latency..=self.config.max_latency)
            } else {
                self.config.min_latency
            };
            let rate = self.config.failure_rate.clamp(0.0, 1.0);
            (delay, rate > 0.0 && rng.gen_bool(rate))
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            trace!("Injected failure for {}", operation);
            return Err(FetchError::Transport(format!("simulated network failure during {}", operation)));
        }
        Ok(())
    }
}

impl Default for SimulatedBlogSource {
    fn default() -> Self {
        Self::new(SimulatedSourceConfig::default())
    }
}

#[async_trait]
impl BlogSource for SimulatedBlogSource {
    async fn fetch_list(&self, query: &PostQuery) -> FetchResult<PostPage> {
        if query.page == 0 {
            return Err(FetchError::InvalidArgument("page must be at least 1".into()));
        }
        if query.page_size == 0 {
            return Err(FetchError::InvalidArgument("page size must be at least 1".into()));
        }

        self.simulate_network("list").await?;

        let posts = self.read();
        let mut matching: Vec<&BlogPost> = posts
            .iter()
            .filter(|post| query.filters.matches(post))
            .collect();
        matching.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let total = matching.len();
        let start = (query.page - 1).saturating_mul(query.page_size);
        let page: Vec<BlogPost> = matching
            .into_iter()
            .skip(start)
            .take(query.page_size)
            .cloned()
            .collect();

        trace!("Serving {} of {} posts for page {}", page.len(), total, query.page);
        Ok(PostPage {
            posts: page,
            total,
            page: query.page,
            page_size: query.page_size,
            has_next: query.page.saturating_mul(query.page_size) < total,
            has_prev: query.page > 1,
        })
    }

    async fn fetch_post(&self, slug: &str) -> FetchResult<BlogPost> {
        self.simulate_network("post").await?;
        self.read()
            .iter()
            .find(|post| post.slug == slug || post.id == slug)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("Blog post '{}'", slug)))
    }

    async fn fetch_tags(&self) -> FetchResult<Vec<String>> {
        self.simulate_network("tags").await?;
        let posts = self.read();
        let used: BTreeSet<&str> = posts
            .iter()
            .flat_map(|post| post.tags.iter().map(String::as_str))
            .collect();
        Ok(used.into_iter().map(String::from).collect())
    }

    async fn fetch_authors(&self) -> FetchResult<Vec<String>> {
        self.simulate_network("authors").await?;
        let posts = self.read();
        let authors: BTreeSet<&str> = posts.iter().map(|post| post.author.as_str()).collect();
        Ok(authors.into_iter().map(String::from).collect())
    }

    async fn create_post(&self, draft: PostDraft) -> FetchResult<BlogPost> {
        validate_draft(&draft)?;
        self.simulate_network("create").await?;

        let mut posts = self.write();
        let slug = unique_slug(&posts, &slugify(&draft.title), None);
        let now = Utc::now();
        let post = BlogPost {
            id: uuid::Uuid::new_v4().to_string(),
            excerpt: excerpt_for(&draft),
            reading_time: reading_time(&draft.content),
            title: draft.title,
            slug,
            content: draft.content,
            author: draft.author,
            published_at: now,
            updated_at: now,
            tags: draft.tags,
            cover_image: draft.cover_image,
            published: draft.published,
        };
        posts.push(post.clone());
        debug!("Created post {} ({})", post.slug, post.id);
        Ok(post)
    }

    async fn update_post(&self, id: &str, draft: PostDraft) -> FetchResult<BlogPost> {
        validate_draft(&draft)?;
        self.simulate_network("update").await?;

        let mut posts = self.write();
        let index = posts
            .iter()
            .position(|post| post.id == id)
            .ok_or_else(|| FetchError::NotFound(format!("Blog post {}", id)))?;
        let slug = unique_slug(&posts, &slugify(&draft.title), Some(id));

        let post = &mut posts[index];
        post.excerpt = excerpt_for(&draft);
        post.reading_time = reading_time(&draft.content);
        post.title = draft.title;
        post.slug = slug;
        post.content = draft.content;
        post.author = draft.author;
        post.tags = draft.tags;
        post.cover_image = draft.cover_image;
        post.published = draft.published;
        post.updated_at = Utc::now();

        debug!("Updated post {}", id);
        Ok(post.clone())
    }

    async fn delete_post(&self, id: &str) -> FetchResult<()> {
        self.simulate_network("delete").await?;
        let mut posts = self.write();
        let before = posts.len();
        posts.retain(|post| post.id != id);
        if posts.len() == before {
            return Err(FetchError::NotFound(format!("Blog post {}", id)));
        }
        debug!("Deleted post {}", id);
        Ok(())
    }
}

fn validate_draft(draft: &PostDraft) -> FetchResult<()> {
    if draft.title.trim().is_empty() {
        return Err(FetchError::InvalidArgument("title must not be empty".into()));
    }
    if draft.author.trim().is_empty() {
        return Err(FetchError::InvalidArgument("author must not be empty".into()));
    }
    Ok(())
}

fn excerpt_for(draft: &PostDraft) -> String {
    if draft.excerpt.trim().is_empty() {
        truncate(&draft.content, 150)
    } else {
        draft.excerpt.clone()
    }
}

fn unique_slug(posts: &[BlogPost], base: &str, exclude_id: Option<&str>) -> String {
    let taken = |candidate: &str| {
        posts
            .iter()
            .any(|post| post.slug == candidate && Some(post.id.as_str()) != exclude_id)
    };

    if !taken(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn catalog_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// Deterministic catalog: post `i` is published `i` days before the epoch,
/// so index order is newest first.
fn generate_catalog(size: usize) -> Vec<BlogPost> {
    let epoch = catalog_epoch();

    (0..size)
        .map(|i| {
            let topic = TOPICS[i % TOPICS.len()];
            let subject = SUBJECTS[(i / TOPICS.len()) % SUBJECTS.len()];
            let title = format!("{} {} (Part {})", topic, subject, i + 1);
            let tags: Vec<String> = [i, i * 3 + 1, i * 7 + 5]
                .iter()
                .map(|n| TAGS[n % TAGS.len()].to_string())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let author = AUTHORS[i % AUTHORS.len()].to_string();
            let content = format!(
                "# {title}\n\n{subject} comes up in every non-trivial frontend. \
                 This article walks through the ideas behind it, the trade-offs \
                 involved and a worked example using {tag}.\n\n\
                 ## Background\n\nMost applications start simple and grow. \
                 Keeping {subject_lower} predictable as they grow is the hard part.\n\n\
                 ## Example\n\nWe build a small feature end to end, then revisit \
                 the design once requirements change.",
                title = title,
                subject = subject,
                subject_lower = subject.to_lowercase(),
                tag = tags.first().map(String::as_str).unwrap_or("plain code"),
            );
            let published_at = epoch - ChronoDuration::days(i as i64);

            BlogPost {
                id: (i + 1).to_string(),
                slug: slugify(&title),
                excerpt: truncate(&format!("{} explained with a worked example.", subject), 150),
                reading_time: reading_time(&content),
                title,
                content,
                author,
                published_at,
                updated_at: published_at,
                tags,
                cover_image: None,
                published: true,
            }
        })
        .collect()
}
