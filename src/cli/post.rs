use anyhow::{bail, Result};
use clap::{Args, Subcommand};
use serde::Serialize;

use super::list::OutputFormat;
use crate::app::App;
use crate::blog::{BlogPost, BlogService, PostDraft, PostQuery};
use crate::utils::text::word_wrap;

/// Print a single post, or create, update or delete one
#[derive(Debug, Args)]
#[command(args_conflicts_with_subcommands = true)]
pub struct PostCommand {
    #[command(subcommand)]
    pub action: Option<PostAction>,

    /// Slug of the post, as shown by `folio list --format json`
    pub slug: Option<String>,

    /// Wrap the body at this many columns
    #[arg(short, long, default_value = "80")]
    pub width: usize,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Subcommand)]
pub enum PostAction {
    /// Publish a new post
    Create {
        #[command(flatten)]
        draft: DraftArgs,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Replace the fields of an existing post
    Update {
        /// Id of the post
        id: String,

        #[command(flatten)]
        draft: DraftArgs,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a post
    Delete {
        /// Id of the post
        id: String,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

/// Post fields accepted by `create` and `update`
#[derive(Debug, Clone, Args)]
pub struct DraftArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub author: String,

    #[arg(long, default_value = "")]
    pub content: String,

    /// Defaults to the start of the content
    #[arg(long, default_value = "")]
    pub excerpt: String,

    /// Repeat for several tags
    #[arg(short, long = "tag")]
    pub tags: Vec<String>,

    #[arg(long)]
    pub cover_image: Option<String>,

    /// Save without publishing
    #[arg(long)]
    pub unpublished: bool,
}

impl From<DraftArgs> for PostDraft {
    fn from(args: DraftArgs) -> Self {
        Self {
            title: args.title,
            content: args.content,
            excerpt: args.excerpt,
            author: args.author,
            tags: args.tags,
            cover_image: args.cover_image,
            published: !args.unpublished,
        }
    }
}

/// Result of a write, with the post count seen by the refreshed listing
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteOutcome {
    action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    post: Option<BlogPost>,
    total_before: usize,
    total_after: usize,
}

impl PostCommand {
    pub async fn execute(&self, app: &App) -> Result<()> {
        if let Some(action) = &self.action {
            return execute_write(app, action.clone()).await;
        }

        let Some(slug) = self.slug.as_deref() else {
            bail!("Give a post slug, or one of create, update or delete");
        };
        let post = app.service().post(slug).await?;
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(post.as_ref())?),
            OutputFormat::Text => print!("{}", render_post(&post, self.width)),
        }
        Ok(())
    }
}

async fn execute_write(app: &App, action: PostAction) -> Result<()> {
    let first_page = PostQuery::new(1, app.config().default_page_size);
    let (outcome, format) = match action {
        PostAction::Create { draft, format } => {
            (apply_write(app.service(), &first_page, Write::Create(draft.into())).await?, format)
        }
        PostAction::Update { id, draft, format } => (
            apply_write(app.service(), &first_page, Write::Update(id, draft.into())).await?,
            format,
        ),
        PostAction::Delete { id, format } => {
            (apply_write(app.service(), &first_page, Write::Delete(id)).await?, format)
        }
    };

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => {
            match &outcome.post {
                Some(post) => println!("Post {} '{}' ({}, id {})", outcome.action, post.title, post.slug, post.id),
                None => println!("Post {}", outcome.action),
            }
            println!("Posts listed: {} -> {}", outcome.total_before, outcome.total_after);
        }
    }
    Ok(())
}

enum Write {
    Create(PostDraft),
    Update(String, PostDraft),
    Delete(String),
}

/// Run a write between two reads of `listing`. The second read goes through
/// the cache, so it only sees the change because the write invalidated it.
async fn apply_write(service: &BlogService, listing: &PostQuery, write: Write) -> Result<WriteOutcome> {
    let total_before = service.posts(listing).await?.total;

    let (action, post) = match write {
        Write::Create(draft) => ("created", Some(service.create_post(draft).await?)),
        Write::Update(id, draft) => ("updated", Some(service.update_post(&id, draft).await?)),
        Write::Delete(id) => {
            service.delete_post(&id).await?;
            ("deleted", None)
        }
    };

    let total_after = service.posts(listing).await?.total;
    Ok(WriteOutcome {
        action,
        post,
        total_before,
        total_after,
    })
}

fn render_post(post: &BlogPost, width: usize) -> String {
    let mut out = format!("{}\n{}\n", post.title, "=".repeat(post.title.chars().count()));
    out.push_str(&format!(
        "{} | {} | {} min read\n",
        post.author,
        post.published_at.format("%B %-d, %Y"),
        post.reading_time
    ));
    if !post.tags.is_empty() {
        out.push_str(&format!("Tags: {}\n", post.tags.join(", ")));
    }
    out.push('\n');
    for paragraph in post.content.split("\n\n") {
        for line in word_wrap(paragraph, width.max(20)) {
            out.push_str(&line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blog::{QueryPresets, SimulatedBlogSource, SimulatedSourceConfig};
    use crate::query::{FetchError, QueryCache, RetryPolicy};
    use std::sync::Arc;

    fn service() -> BlogService {
        BlogService::new(
            Arc::new(SimulatedBlogSource::new(SimulatedSourceConfig::instant(12))),
            QueryCache::default(),
            QueryPresets::default().with_retry(RetryPolicy::none()),
        )
    }

    fn draft(title: &str) -> PostDraft {
        DraftArgs {
            title: title.to_string(),
            author: "Leanne Graham".to_string(),
            content: "Short body".to_string(),
            excerpt: String::new(),
            tags: vec!["Rust".to_string()],
            cover_image: None,
            unpublished: false,
        }
        .into()
    }

    #[tokio::test]
    async fn test_create_then_delete_refreshes_listing() {
        let service = service();
        let listing = PostQuery::new(1, 10);

        let created = apply_write(&service, &listing, Write::Create(draft("Cache Notes")))
            .await
            .unwrap();
        assert_eq!((created.total_before, created.total_after), (12, 13));
        let post = created.post.unwrap();
        assert_eq!(post.slug, "cache-notes");
        assert!(post.published);

        let deleted = apply_write(&service, &listing, Write::Delete(post.id))
            .await
            .unwrap();
        assert_eq!((deleted.total_before, deleted.total_after), (13, 12));
        assert!(deleted.post.is_none());
    }

    #[tokio::test]
    async fn test_update_is_visible_through_the_cache() {
        let service = service();
        let listing = PostQuery::new(1, 10);

        let updated = apply_write(&service, &listing, Write::Update("1".into(), draft("Renamed Post")))
            .await
            .unwrap();
        assert_eq!(updated.total_after, 12);

        let post = service.post("renamed-post").await.unwrap();
        assert_eq!(post.id, "1");
        assert_eq!(post.title, "Renamed Post");
    }

    #[tokio::test]
    async fn test_invalid_draft_is_rejected() {
        let service = service();
        let result = apply_write(&service, &PostQuery::new(1, 10), Write::Create(draft("  "))).await;

        let err = result.unwrap_err();
        assert!(matches!(err.downcast_ref::<FetchError>(), Some(FetchError::InvalidArgument(_))));
    }
}
