mod build;
mod context;
mod cron;
mod ingest;
mod invalidate;
mod outbox;
mod publish_scheduled;
mod queue;

pub use build::{BuildJobPayload, enqueue_build_job, process_build_job};
pub use context::{DEFAULT_BUILD_DEADLINE, JobWorkerContext, job_failed};
pub use cron::{
    BuildTick, DispatchNotificationsTick, IngestArticlesTick, IngestVideosTick,
    PublishScheduledTick, SelectiveInvalidateTick, build_schedule,
    dispatch_notifications_schedule, ingest_articles_schedule, ingest_videos_schedule,
    on_build_tick, on_dispatch_notifications_tick, on_ingest_articles_tick,
    on_ingest_videos_tick, on_publish_scheduled_tick, on_selective_invalidate_tick,
    publish_scheduled_schedule, selective_invalidate_schedule,
};
pub use ingest::{IngestJobPayload, enqueue_ingest_job, process_ingest_job};
pub use invalidate::{SelectiveInvalidatePayload, process_selective_invalidate_job};
pub use outbox::{DispatchNotificationsPayload, process_dispatch_notifications_job};
pub use publish_scheduled::{PublishScheduledPayload, process_publish_scheduled_job};
pub use queue::enqueue_job;
