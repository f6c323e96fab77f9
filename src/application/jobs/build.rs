//! The bake-and-publish job.
//!
//! One durable job per publish/unpublish event plus an hourly scheduled
//! run. The `build` lock admits at most one run across the fleet; a
//! contender that loses records its run as skipped and succeeds, since
//! the winner observes the same CMS state.

use apalis::prelude::{Data, Error as ApalisError};
use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use uuid::Uuid;

use crate::{
    application::baker::build_dir_for,
    application::jobs::{context::JobWorkerContext, context::job_failed, queue::enqueue_job},
    application::lock::{BUILD_LOCK_KEY, LockLease},
    application::repos::{BuildRunsRepo, JobsRepo, RepoError},
    domain::types::{BuildStatus, BuildTrigger, JobType},
};

const METRIC_BUILDS_TOTAL: &str = "portalbake_builds_total";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildJobPayload {
    pub trigger: BuildTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Enqueue a bake. Fire-and-forget; builds run single-attempt because
/// the hourly schedule retries for free.
pub async fn enqueue_build_job<J: JobsRepo + ?Sized>(
    repo: &J,
    trigger: BuildTrigger,
    reason: Option<String>,
) -> Result<String, RepoError> {
    let payload = BuildJobPayload { trigger, reason };
    enqueue_job(repo, JobType::BuildAndPublish, &payload, None, 1).await
}

/// Transition the run to `running`. When the repository write fails,
/// the lease is released and the run recorded as failed before the
/// error propagates; the lock must not sit held for a full TTL over a
/// run that never started.
async fn mark_running_or_release(
    runs: &dyn BuildRunsRepo,
    lease: LockLease,
    run_id: Uuid,
    build_dir: &str,
) -> Result<LockLease, ApalisError> {
    match runs.mark_running(run_id, build_dir).await {
        Ok(()) => Ok(lease),
        Err(err) => {
            if let Err(release_err) = lease.release().await {
                warn!(
                    target = "application::jobs::process_build_job",
                    %run_id, error = %release_err, "build lock release failed"
                );
            }
            if let Err(mark_err) = runs
                .mark_finished(run_id, BuildStatus::Failed, Some("could not mark run running"))
                .await
            {
                warn!(
                    target = "application::jobs::process_build_job",
                    %run_id, error = %mark_err, "failed to record run failure"
                );
            }
            counter!(METRIC_BUILDS_TOTAL, "status" => "failed").increment(1);
            Err(job_failed(err))
        }
    }
}

pub async fn process_build_job(
    payload: BuildJobPayload,
    context: Data<JobWorkerContext>,
) -> Result<(), ApalisError> {
    let ctx = &*context;
    let runs: &dyn BuildRunsRepo = ctx.repositories.as_ref();
    let run_id = runs.create_run(payload.trigger).await.map_err(job_failed)?;

    let lease = match ctx.lock.acquire(BUILD_LOCK_KEY).await {
        Ok(Some(lease)) => lease,
        Ok(None) => {
            info!(
                target = "application::jobs::process_build_job",
                %run_id,
                trigger = payload.trigger.as_str(),
                "build lock held elsewhere; recording run as skipped"
            );
            runs.mark_finished(run_id, BuildStatus::Skipped, Some("build lock held elsewhere"))
                .await
                .map_err(job_failed)?;
            counter!(METRIC_BUILDS_TOTAL, "status" => "skipped").increment(1);
            return Ok(());
        }
        Err(err) => return Err(job_failed(err)),
    };

    let now = Utc::now();
    let build_dir = build_dir_for(ctx.baker.build_root(), now);
    let lease = mark_running_or_release(runs, lease, run_id, &build_dir.to_string_lossy()).await?;
    info!(
        target = "application::jobs::process_build_job",
        %run_id,
        trigger = payload.trigger.as_str(),
        reason = payload.reason.as_deref().unwrap_or("unspecified"),
        build_dir = %build_dir.display(),
        "build started"
    );

    let outcome = tokio::time::timeout(ctx.build_deadline, ctx.baker.run(now)).await;

    if let Err(err) = lease.release().await {
        warn!(
            target = "application::jobs::process_build_job",
            %run_id, error = %err, "build lock release failed"
        );
    }

    match outcome {
        Ok(Ok(report)) => {
            info!(
                target = "application::jobs::process_build_job",
                %run_id,
                pages_rendered = report.pages_rendered,
                pages_skipped = report.pages_skipped,
                files_uploaded = report.files_uploaded,
                redirects_written = report.redirects_written,
                "build succeeded"
            );
            runs.mark_finished(run_id, BuildStatus::Succeeded, None)
                .await
                .map_err(job_failed)?;
            counter!(METRIC_BUILDS_TOTAL, "status" => "succeeded").increment(1);
            Ok(())
        }
        Ok(Err(err)) => {
            let message = err.to_string();
            warn!(
                target = "application::jobs::process_build_job",
                %run_id, error = %message, "build failed"
            );
            runs.mark_finished(run_id, BuildStatus::Failed, Some(&message))
                .await
                .map_err(job_failed)?;
            counter!(METRIC_BUILDS_TOTAL, "status" => "failed").increment(1);
            Err(job_failed(err))
        }
        Err(elapsed) => {
            warn!(
                target = "application::jobs::process_build_job",
                %run_id,
                deadline_seconds = ctx.build_deadline.as_secs(),
                "build exceeded deadline; cancelled"
            );
            // The bake future was dropped mid-flight; its directory may
            // survive, so sweep it here.
            if let Err(err) = tokio::fs::remove_dir_all(&build_dir).await {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        target = "application::jobs::process_build_job",
                        %run_id, error = %err, "stale build directory removal failed"
                    );
                }
            }
            runs.mark_finished(run_id, BuildStatus::Failed, Some("deadline exceeded"))
                .await
                .map_err(job_failed)?;
            counter!(METRIC_BUILDS_TOTAL, "status" => "failed").increment(1);
            Err(job_failed(elapsed))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::application::lock::{DistributedLock, LockStore, MemoryLockStore};
    use crate::application::repos::BuildRunsRepo;
    use crate::domain::entities::BuildRunRecord;

    use super::*;

    #[derive(Default)]
    struct BrokenRunsRepo {
        finished: Mutex<Vec<(Uuid, BuildStatus)>>,
    }

    #[async_trait]
    impl BuildRunsRepo for BrokenRunsRepo {
        async fn create_run(&self, _trigger: BuildTrigger) -> Result<Uuid, RepoError> {
            Ok(Uuid::new_v4())
        }

        async fn mark_running(&self, _id: Uuid, _build_dir: &str) -> Result<(), RepoError> {
            Err(RepoError::from_persistence("runs table unavailable"))
        }

        async fn mark_finished(
            &self,
            id: Uuid,
            status: BuildStatus,
            _detail: Option<&str>,
        ) -> Result<(), RepoError> {
            self.finished
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((id, status));
            Ok(())
        }

        async fn find_run(&self, _id: Uuid) -> Result<Option<BuildRunRecord>, RepoError> {
            Ok(None)
        }

        async fn recent_runs(&self, _limit: i64) -> Result<Vec<BuildRunRecord>, RepoError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn failed_running_transition_releases_the_lock_and_fails_the_run() {
        let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::default());
        let lock = DistributedLock::new(Arc::clone(&store), std::time::Duration::from_secs(600));
        let repo = BrokenRunsRepo::default();
        let run_id = Uuid::new_v4();

        let lease = lock.acquire(BUILD_LOCK_KEY).await.unwrap().unwrap();
        let result = mark_running_or_release(&repo, lease, run_id, "/tmp/never-built").await;
        assert!(result.is_err());

        let finished = repo
            .finished
            .lock()
            .unwrap()
            .clone();
        assert_eq!(finished, vec![(run_id, BuildStatus::Failed)]);

        // The next contender must not have to wait out the TTL.
        assert!(lock.acquire(BUILD_LOCK_KEY).await.unwrap().is_some());
    }
}
