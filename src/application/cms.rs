//! Capability seam in front of the content management backend.
//!
//! Everything the pipeline needs from the CMS is expressed here so the
//! baker, publisher and ingester never touch CMS tables directly and
//! the jobs can be tested against an in-memory adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::entry::NormalizedEntry;

#[derive(Debug, Error)]
pub enum CmsError {
    #[error("cms persistence failure: {0}")]
    Persistence(String),
    #[error("duplicate draft: {slug}")]
    DuplicateDraft { slug: String },
    #[error("cms rendering failure for {path}: {message}")]
    Render { path: String, message: String },
}

impl CmsError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, CmsError::DuplicateDraft { .. })
    }
}

/// A live page the baker has to render. `path` is site-root relative
/// with a trailing slash ("/" for the home page).
#[derive(Debug, Clone)]
pub struct PublicPage {
    pub path: String,
    pub title: String,
}

/// Slim page handle used by webhook payloads and invalidation scoping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRef {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedirectTarget {
    /// Another path on the same site, stored relative.
    Internal(String),
    /// A fully qualified URL off-site.
    External(String),
}

#[derive(Debug, Clone)]
pub struct CmsRedirect {
    pub from_path: String,
    pub target: RedirectTarget,
}

/// Everything needed to create a moderated draft from a feed entry.
#[derive(Debug, Clone)]
pub struct DraftPage {
    pub slug: String,
    pub title: String,
    pub authors: Vec<String>,
    pub source_url: String,
    pub image_key: Option<String>,
    pub published_at: DateTime<Utc>,
}

impl DraftPage {
    pub fn from_entry(entry: &NormalizedEntry, image_key: Option<String>) -> Self {
        Self {
            slug: entry.identity_slug(),
            title: entry.title.clone(),
            authors: entry.authors.clone(),
            source_url: entry.url.clone(),
            image_key,
            published_at: entry.timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftOutcome {
    Created { id: Uuid },
    AlreadyKnown,
}

/// Result of flipping scheduled pages live.
#[derive(Debug, Clone, Default)]
pub struct PublishReport {
    pub published: Vec<PageRef>,
    pub unpublished: Vec<PageRef>,
}

impl PublishReport {
    pub fn is_empty(&self) -> bool {
        self.published.is_empty() && self.unpublished.is_empty()
    }
}

/// Read-side CMS capabilities. Render methods return full response
/// bodies so the baker stays a dumb file writer.
#[async_trait]
pub trait CmsAdapter: Send + Sync {
    async fn list_public_pages(&self) -> Result<Vec<PublicPage>, CmsError>;

    async fn render_page(&self, path: &str, secure: bool) -> Result<String, CmsError>;

    async fn error_page_404(&self, secure: bool) -> Result<String, CmsError>;

    async fn sitemap_xml(&self) -> Result<String, CmsError>;

    /// Absolute URLs of every sitemap entry, used for cache warming.
    async fn sitemap_urls(&self) -> Result<Vec<String>, CmsError>;

    async fn list_redirects(&self) -> Result<Vec<CmsRedirect>, CmsError>;

    /// Flip every page whose go-live moment has passed, and pull every
    /// page whose expiry has passed. Returns what changed so the caller
    /// can decide whether a rebuild is warranted.
    async fn publish_scheduled(&self, now: DateTime<Utc>) -> Result<PublishReport, CmsError>;

    /// Open a draft-creation transaction. Nothing is visible to other
    /// callers until `commit`.
    async fn begin(&self) -> Result<Box<dyn CmsTransaction>, CmsError>;
}

/// Unit of work for one ingestion source. Draft rows, stored images,
/// queued notifications and the watermark land atomically on commit.
#[async_trait]
pub trait CmsTransaction: Send {
    async fn create_draft(&mut self, draft: DraftPage) -> Result<DraftOutcome, CmsError>;

    /// Persist a downloaded entry image, returning the stored key.
    async fn store_image(&mut self, slug: &str, url: &str, body: &[u8])
    -> Result<String, CmsError>;

    /// Record that moderators should be told about `draft_id` once it
    /// exists, i.e. after this transaction commits.
    async fn queue_moderation_notification(&mut self, draft_id: Uuid) -> Result<(), CmsError>;

    async fn advance_watermark(
        &mut self,
        source_id: Uuid,
        to: DateTime<Utc>,
    ) -> Result<(), CmsError>;

    async fn commit(self: Box<Self>) -> Result<(), CmsError>;
}
