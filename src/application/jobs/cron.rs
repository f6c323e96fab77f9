//! Cron cadences.
//!
//! Each tick is a marker struct consumed by an apalis-cron worker whose
//! handler enqueues the corresponding durable job, so retries and
//! at-least-once delivery stay with the queue regardless of how a run
//! was triggered.

use std::str::FromStr;

use apalis::prelude::{Data, Error as ApalisError};
use apalis_cron::Schedule;
use tracing::warn;

use crate::{
    application::jobs::{
        build::enqueue_build_job,
        context::{JobWorkerContext, job_failed},
        ingest::enqueue_ingest_job,
        invalidate::SelectiveInvalidatePayload,
        outbox::DispatchNotificationsPayload,
        publish_scheduled::PublishScheduledPayload,
        queue::enqueue_job,
    },
    domain::types::{BuildTrigger, JobType, SourceKind},
};

macro_rules! cron_tick {
    ($name:ident) => {
        #[derive(Default, Debug, Clone)]
        pub struct $name;

        impl From<chrono::DateTime<chrono::Utc>> for $name {
            fn from(_: chrono::DateTime<chrono::Utc>) -> Self {
                Self
            }
        }
    };
}

cron_tick!(BuildTick);
cron_tick!(PublishScheduledTick);
cron_tick!(SelectiveInvalidateTick);
cron_tick!(IngestArticlesTick);
cron_tick!(IngestVideosTick);
cron_tick!(DispatchNotificationsTick);

fn parse_schedule(expr: &str) -> Schedule {
    Schedule::from_str(expr).expect("invalid cron expression")
}

/// Hourly catch-up bake at :30, between the two ingest cadences.
pub fn build_schedule() -> Schedule {
    parse_schedule("0 30 * * * *")
}

/// Scheduled-page sweep at :55 every hour.
pub fn publish_scheduled_schedule() -> Schedule {
    parse_schedule("0 55 * * * *")
}

/// Selective invalidation once a day at 00:15.
pub fn selective_invalidate_schedule() -> Schedule {
    parse_schedule("0 15 0 * * *")
}

/// Article feeds every two hours at :17.
pub fn ingest_articles_schedule() -> Schedule {
    parse_schedule("0 17 */2 * * *")
}

/// Video feeds every two hours at :37.
pub fn ingest_videos_schedule() -> Schedule {
    parse_schedule("0 37 */2 * * *")
}

/// Outbox drain every five minutes.
pub fn dispatch_notifications_schedule() -> Schedule {
    parse_schedule("0 */5 * * * *")
}

pub async fn on_build_tick(
    _tick: BuildTick,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    enqueue_build_job(
        ctx.repositories.as_ref(),
        BuildTrigger::Scheduled,
        Some("hourly schedule".to_string()),
    )
    .await
    .map_err(job_failed)?;
    Ok(())
}

pub async fn on_publish_scheduled_tick(
    _tick: PublishScheduledTick,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    enqueue_job(
        ctx.repositories.as_ref(),
        JobType::PublishScheduledPages,
        &PublishScheduledPayload::default(),
        None,
        5,
    )
    .await
    .map_err(job_failed)?;
    Ok(())
}

pub async fn on_selective_invalidate_tick(
    _tick: SelectiveInvalidateTick,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    enqueue_job(
        ctx.repositories.as_ref(),
        JobType::SelectiveCdnInvalidate,
        &SelectiveInvalidatePayload { warm: true },
        None,
        1,
    )
    .await
    .map_err(job_failed)?;
    Ok(())
}

pub async fn on_ingest_articles_tick(
    _tick: IngestArticlesTick,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    if !ctx.ingestion_enabled {
        return Ok(());
    }
    enqueue_ingest_job(ctx.repositories.as_ref(), SourceKind::ExternalArticle)
        .await
        .map_err(job_failed)?;
    Ok(())
}

pub async fn on_ingest_videos_tick(
    _tick: IngestVideosTick,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    if !ctx.ingestion_enabled {
        return Ok(());
    }
    enqueue_ingest_job(ctx.repositories.as_ref(), SourceKind::ExternalVideo)
        .await
        .map_err(job_failed)?;
    Ok(())
}

pub async fn on_dispatch_notifications_tick(
    _tick: DispatchNotificationsTick,
    ctx: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    if let Err(err) = enqueue_job(
        ctx.repositories.as_ref(),
        JobType::DispatchNotifications,
        &DispatchNotificationsPayload::default(),
        None,
        1,
    )
    .await
    {
        warn!(
            target = "application::jobs::cron",
            error = %err,
            "failed to enqueue outbox dispatch"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedules_parse_and_tick() {
        for schedule in [
            build_schedule(),
            publish_scheduled_schedule(),
            selective_invalidate_schedule(),
            ingest_articles_schedule(),
            ingest_videos_schedule(),
            dispatch_notifications_schedule(),
        ] {
            let upcoming: Vec<_> = schedule.upcoming(chrono::Utc).take(2).collect();
            assert_eq!(upcoming.len(), 2);
        }
    }
}
