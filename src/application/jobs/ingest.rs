//! Durable feed-ingest jobs, one queue per source kind.
//!
//! Ingest talks to the open internet, so transient failures are
//! rescheduled by the processor itself with exponential backoff and
//! jitter instead of leaning on the storage layer's fixed re-poll.
//! The attempt count rides in the payload.

use apalis::prelude::{Data, Error as ApalisError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::error::ErrorKind,
    application::jobs::{
        context::{JobWorkerContext, job_aborted, job_failed},
        queue::{enqueue_job, retry_delay},
    },
    application::repos::{JobsRepo, RepoError},
    domain::types::{JobType, SourceKind},
};

pub const INGEST_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJobPayload {
    pub kind: SourceKind,
    /// Zero-based count of tries already spent on this work.
    #[serde(default)]
    pub attempt: u32,
}

fn queue_for(kind: SourceKind) -> JobType {
    match kind {
        SourceKind::ExternalArticle => JobType::IngestArticles,
        SourceKind::ExternalVideo => JobType::IngestVideos,
    }
}

pub async fn enqueue_ingest_job<J: JobsRepo + ?Sized>(
    repo: &J,
    kind: SourceKind,
) -> Result<String, RepoError> {
    let payload = IngestJobPayload { kind, attempt: 0 };
    enqueue_job(repo, queue_for(kind), &payload, None, INGEST_MAX_ATTEMPTS).await
}

pub async fn process_ingest_job(
    payload: IngestJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let started_at = Utc::now();
    let report = match ctx.ingester.ingest_kind(payload.kind, started_at).await {
        Ok(report) => report,
        Err(err) if err.kind == ErrorKind::Conflict => {
            warn!(
                target = "application::jobs::process_ingest_job",
                kind = payload.kind.as_str(),
                error = %err,
                "ingest skipped"
            );
            return Ok(());
        }
        Err(err) if err.is_retryable() => {
            let next_attempt = payload.attempt + 1;
            if next_attempt >= INGEST_MAX_ATTEMPTS as u32 {
                warn!(
                    target = "application::jobs::process_ingest_job",
                    kind = payload.kind.as_str(),
                    attempt = payload.attempt,
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(job_aborted(err));
            }

            let delay = retry_delay(payload.attempt);
            let retry = IngestJobPayload {
                kind: payload.kind,
                attempt: next_attempt,
            };
            let repo: &dyn JobsRepo = ctx.repositories.as_ref();
            match enqueue_job(
                repo,
                queue_for(payload.kind),
                &retry,
                Some(started_at + delay),
                INGEST_MAX_ATTEMPTS,
            )
            .await
            {
                Ok(job_id) => {
                    warn!(
                        target = "application::jobs::process_ingest_job",
                        kind = payload.kind.as_str(),
                        attempt = payload.attempt,
                        delay_ms = delay.num_milliseconds(),
                        %job_id,
                        error = %err,
                        "transient failure; retry scheduled"
                    );
                    return Ok(());
                }
                // Could not schedule the successor; hand the row back
                // to the queue so its own attempt budget applies.
                Err(enqueue_err) => {
                    warn!(
                        target = "application::jobs::process_ingest_job",
                        kind = payload.kind.as_str(),
                        error = %enqueue_err,
                        "failed to schedule retry"
                    );
                    return Err(job_failed(err));
                }
            }
        }
        Err(err) => return Err(job_aborted(err)),
    };

    info!(
        target = "application::jobs::process_ingest_job",
        kind = payload.kind.as_str(),
        sources_processed = report.sources_processed,
        entries_seen = report.entries_seen,
        drafts_created = report.drafts_created,
        duplicates = report.duplicates,
        "ingest job complete"
    );
    Ok(())
}
