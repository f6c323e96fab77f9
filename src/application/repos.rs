//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::entities::{BuildRunRecord, IngestionSourceRecord, OutboxRecord};
use crate::domain::types::{BuildStatus, BuildTrigger, JobType, SourceKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

/// Build-run audit trail. Written exclusively by the task-queue layer.
#[async_trait]
pub trait BuildRunsRepo: Send + Sync {
    /// Record a pending run and return its id.
    async fn create_run(&self, trigger: BuildTrigger) -> Result<Uuid, RepoError>;

    async fn mark_running(&self, id: Uuid, build_dir: &str) -> Result<(), RepoError>;

    /// Transition a run into a terminal status. `detail` carries the
    /// failure message, when there is one.
    async fn mark_finished(
        &self,
        id: Uuid,
        status: BuildStatus,
        detail: Option<&str>,
    ) -> Result<(), RepoError>;

    async fn find_run(&self, id: Uuid) -> Result<Option<BuildRunRecord>, RepoError>;

    async fn recent_runs(&self, limit: i64) -> Result<Vec<BuildRunRecord>, RepoError>;
}

/// Read side of the configured feed sources. The watermark write
/// happens inside the CMS transaction, not here.
#[async_trait]
pub trait IngestionSourcesRepo: Send + Sync {
    async fn list_enabled(&self, kind: SourceKind) -> Result<Vec<IngestionSourceRecord>, RepoError>;
}

/// Moderation-notification outbox, drained after commit by its own job.
#[async_trait]
pub trait OutboxRepo: Send + Sync {
    async fn list_undelivered(&self, limit: i64) -> Result<Vec<OutboxRecord>, RepoError>;

    async fn mark_delivered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepoError>;
}

/// Durable queue producer. Workers consume through apalis; producers
/// (webhooks, CLI) enqueue through this trait.
#[async_trait]
pub trait JobsRepo: Send + Sync {
    async fn enqueue_job(
        &self,
        job_type: JobType,
        payload: serde_json::Value,
        run_at: DateTime<Utc>,
        max_attempts: i32,
    ) -> Result<String, RepoError>;
}
