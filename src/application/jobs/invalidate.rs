//! Daily selective CDN invalidation plus cache warm.
//!
//! Events, people and topics pages surface time-relative content
//! ("upcoming", "next week") that goes stale even without a publish, so
//! those sections are evicted once a day and re-warmed from the
//! sitemap.

use std::time::Duration;

use apalis::prelude::{Data, Error as ApalisError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::jobs::{context::JobWorkerContext, context::job_failed};

pub const WARM_OVERALL_DEADLINE: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectiveInvalidatePayload {
    #[serde(default)]
    pub warm: bool,
}

pub async fn process_selective_invalidate_job(
    payload: SelectiveInvalidatePayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    ctx.invalidator
        .invalidate_selective(Utc::now())
        .await
        .map_err(job_failed)?;

    if !payload.warm {
        return Ok(());
    }

    let urls = match ctx.cms.sitemap_urls().await {
        Ok(urls) => urls,
        Err(err) => {
            warn!(
                target = "application::jobs::process_selective_invalidate_job",
                error = %err,
                "sitemap unavailable; skipping warm"
            );
            return Ok(());
        }
    };

    match tokio::time::timeout(WARM_OVERALL_DEADLINE, ctx.invalidator.warm(&urls)).await {
        Ok(report) => {
            info!(
                target = "application::jobs::process_selective_invalidate_job",
                fetched = report.fetched,
                failed = report.failed,
                "warm pass complete"
            );
        }
        Err(_) => {
            warn!(
                target = "application::jobs::process_selective_invalidate_job",
                deadline_seconds = WARM_OVERALL_DEADLINE.as_secs(),
                "warm pass hit overall deadline"
            );
        }
    }
    Ok(())
}
