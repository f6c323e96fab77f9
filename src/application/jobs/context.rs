use std::{sync::Arc, time::Duration};

use apalis::prelude::Error as ApalisError;

use crate::{
    application::baker::Baker,
    application::cms::CmsAdapter,
    application::ingest::Ingester,
    application::invalidation::CdnInvalidator,
    application::lock::DistributedLock,
    application::notify::ModerationNotifier,
    infra::db::PostgresRepositories,
};

pub const DEFAULT_BUILD_DEADLINE: Duration = Duration::from_secs(1800);

/// Shared context passed to job workers so they can reach the
/// pipeline's capabilities.
#[derive(Clone)]
pub struct JobWorkerContext {
    pub repositories: Arc<PostgresRepositories>,
    pub cms: Arc<dyn CmsAdapter>,
    pub baker: Arc<Baker>,
    pub invalidator: Arc<CdnInvalidator>,
    pub ingester: Arc<Ingester>,
    pub lock: Arc<DistributedLock>,
    pub notifier: Arc<dyn ModerationNotifier>,
    pub build_deadline: Duration,
    pub ingestion_enabled: bool,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Convert any error into an [`ApalisError::Failed`]. Failed jobs are
/// retried until their queue's attempt budget runs out.
pub fn job_failed<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Failed(Arc::new(boxed))
}

/// Convert any error into an [`ApalisError::Abort`], which surfaces the
/// failure without spending further attempts.
pub fn job_aborted<E>(err: E) -> ApalisError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let boxed: BoxError = Box::new(err);
    ApalisError::Abort(Arc::new(boxed))
}
