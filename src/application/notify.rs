//! Moderator notification seam.
//!
//! Drafts queue a row in the notification outbox inside the ingest
//! transaction; a dispatch job drains the outbox through this trait
//! after commit, so notifications for rolled-back drafts never go out.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

#[async_trait]
pub trait ModerationNotifier: Send + Sync {
    /// Tell moderators that `draft_id` is awaiting review.
    async fn notify_draft(&self, draft_id: Uuid) -> Result<(), NotifyError>;
}
