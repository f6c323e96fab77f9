//! Hourly go-live sweep.
//!
//! Asks the CMS to flip pages whose scheduled publish moment has passed
//! and to pull pages past their expiry. Any change queues a bake so the
//! static site catches up.

use apalis::prelude::{Data, Error as ApalisError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    application::jobs::{build::enqueue_build_job, context::JobWorkerContext, context::job_failed},
    domain::types::BuildTrigger,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishScheduledPayload {}

pub async fn process_publish_scheduled_job(
    _payload: PublishScheduledPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let report = ctx
        .cms
        .publish_scheduled(Utc::now())
        .await
        .map_err(job_failed)?;

    if report.is_empty() {
        info!(
            target = "application::jobs::process_publish_scheduled_job",
            "no scheduled pages due"
        );
        return Ok(());
    }

    info!(
        target = "application::jobs::process_publish_scheduled_job",
        published = report.published.len(),
        unpublished = report.unpublished.len(),
        "scheduled pages flipped; queueing bake"
    );
    if let Err(err) = enqueue_build_job(
        ctx.repositories.as_ref(),
        BuildTrigger::Scheduled,
        Some("scheduled publish sweep".to_string()),
    )
    .await
    {
        warn!(
            target = "application::jobs::process_publish_scheduled_job",
            error = %err,
            "failed to enqueue follow-up build"
        );
        return Err(job_failed(err));
    }
    Ok(())
}
