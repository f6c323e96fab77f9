use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::{
    application::repos::{JobsRepo, RepoError},
    domain::types::JobType,
};

const MAX_RETRY_DELAY_SECS: i64 = 300;

/// Delay before re-running a job that failed its `attempt`-th try:
/// `2^attempt` seconds capped at five minutes, plus up to a second of
/// jitter.
pub fn retry_delay(attempt: u32) -> Duration {
    let base = 1i64 << attempt.min(16);
    let jitter_ms: i64 = rand::thread_rng().gen_range(0..1_000);
    Duration::seconds(base.min(MAX_RETRY_DELAY_SECS)) + Duration::milliseconds(jitter_ms)
}

/// Enqueue a job with the provided payload, returning the assigned id.
pub async fn enqueue_job<J, P>(
    repo: &J,
    job_type: JobType,
    payload: &P,
    run_at: Option<DateTime<Utc>>,
    max_attempts: i32,
) -> Result<String, RepoError>
where
    J: JobsRepo + ?Sized,
    P: serde::Serialize,
{
    let payload = serde_json::to_value(payload)
        .map_err(|err| RepoError::from_persistence(err.to_string()))?;
    repo.enqueue_job(
        job_type,
        payload,
        run_at.unwrap_or_else(Utc::now),
        max_attempts,
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_doubles_per_attempt() {
        for attempt in 0..6 {
            let base = 1i64 << attempt;
            let delay = retry_delay(attempt);
            assert!(delay >= Duration::seconds(base));
            assert!(delay < Duration::seconds(base) + Duration::seconds(1));
        }
    }

    #[test]
    fn retry_delay_is_capped() {
        for attempt in [10, 16, u32::MAX] {
            let delay = retry_delay(attempt);
            assert!(delay < Duration::seconds(MAX_RETRY_DELAY_SECS) + Duration::seconds(1));
            assert!(delay >= Duration::seconds(MAX_RETRY_DELAY_SECS));
        }
    }
}
