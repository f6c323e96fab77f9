//! Drains the moderation-notification outbox.
//!
//! Rows are written inside the ingest transaction, so anything visible
//! here belongs to a committed draft. Delivery failures leave the row
//! undelivered for the next sweep.

use apalis::prelude::{Data, Error as ApalisError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::application::jobs::{context::JobWorkerContext, context::job_failed};
use crate::application::repos::OutboxRepo;

const DISPATCH_BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchNotificationsPayload {}

pub async fn process_dispatch_notifications_job(
    _payload: DispatchNotificationsPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let outbox: &dyn OutboxRepo = ctx.repositories.as_ref();
    let pending = outbox
        .list_undelivered(DISPATCH_BATCH_SIZE)
        .await
        .map_err(job_failed)?;

    if pending.is_empty() {
        return Ok(());
    }

    let mut delivered = 0usize;
    let mut failed = 0usize;
    for record in pending {
        match ctx.notifier.notify_draft(record.draft_id).await {
            Ok(()) => {
                outbox
                    .mark_delivered(record.id, Utc::now())
                    .await
                    .map_err(job_failed)?;
                delivered += 1;
            }
            Err(err) => {
                warn!(
                    target = "application::jobs::process_dispatch_notifications_job",
                    draft_id = %record.draft_id,
                    error = %err,
                    "notification delivery failed; will retry next sweep"
                );
                failed += 1;
            }
        }
    }

    info!(
        target = "application::jobs::process_dispatch_notifications_job",
        delivered, failed, "outbox sweep complete"
    );
    Ok(())
}
