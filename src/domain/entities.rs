//! Domain entities mirrored from persistent storage.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::types::{BuildStatus, BuildTrigger, SourceKind};

/// Audit record for one bake-and-publish attempt.
///
/// At most one run is in `Running` state globally; the `build` lock
/// enforces this, the table only records it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildRunRecord {
    pub id: Uuid,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: BuildStatus,
    pub build_dir: String,
    pub trigger: BuildTrigger,
    pub detail: Option<String>,
}

/// A configured feed to poll for external content.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionSourceRecord {
    pub id: Uuid,
    pub label: String,
    pub feed_url: String,
    pub kind: SourceKind,
    pub enabled: bool,
    /// Watermark: only entries strictly newer than this are ingested.
    /// `None` until the first successful sync. Monotonically
    /// non-decreasing; advanced inside the ingest transaction.
    pub last_sync: Option<DateTime<Utc>>,
}

/// A moderation notification staged in the same transaction as its draft.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}
