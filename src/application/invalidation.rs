//! CDN invalidation and cache warming.
//!
//! Full invalidations follow every successful bake; selective ones run
//! on a daily cadence against the configured time-sensitive path globs.
//! Warming walks the sitemap so the first visitor after an invalidation
//! does not pay the origin round trip.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};
use metrics::{counter, histogram};
use tracing::{info, warn};

use crate::application::stores::{CdnClient, CdnError};

pub const DEFAULT_SELECTIVE_TARGETS: &[&str] = &["events/*", "people/*", "topics/*"];
pub const DEFAULT_WARM_CONCURRENCY: usize = 8;
pub const DEFAULT_WARM_URL_TIMEOUT: Duration = Duration::from_secs(15);

const METRIC_INVALIDATIONS_TOTAL: &str = "portalbake_invalidations_total";
const METRIC_WARM_MS: &str = "portalbake_warm_duration_ms";

#[derive(Debug, Clone)]
pub struct WarmReport {
    pub fetched: usize,
    pub failed: usize,
}

pub struct CdnInvalidator {
    client: Arc<dyn CdnClient>,
    http: reqwest::Client,
    distribution_id: Option<String>,
    selective_targets: Vec<String>,
    warm_concurrency: usize,
    warm_url_timeout: Duration,
    last_reference: Mutex<Option<DateTime<Utc>>>,
}

impl CdnInvalidator {
    pub fn new(
        client: Arc<dyn CdnClient>,
        http: reqwest::Client,
        distribution_id: Option<String>,
        selective_targets: Vec<String>,
    ) -> Self {
        Self {
            client,
            http,
            distribution_id,
            selective_targets,
            warm_concurrency: DEFAULT_WARM_CONCURRENCY,
            warm_url_timeout: DEFAULT_WARM_URL_TIMEOUT,
            last_reference: Mutex::new(None),
        }
    }

    pub fn with_warm_settings(mut self, concurrency: usize, url_timeout: Duration) -> Self {
        self.warm_concurrency = concurrency.max(1);
        self.warm_url_timeout = url_timeout;
        self
    }

    /// Evict the whole distribution. Called after each bake.
    pub async fn invalidate_full(&self, now: DateTime<Utc>) -> Result<(), CdnError> {
        self.invalidate(&["/*".to_string()], now).await
    }

    /// Evict only the configured time-sensitive sections.
    pub async fn invalidate_selective(&self, now: DateTime<Utc>) -> Result<(), CdnError> {
        let paths = self.selective_targets.clone();
        if paths.is_empty() {
            info!(target = "application::invalidation", "no selective targets configured");
            return Ok(());
        }
        self.invalidate(&paths, now).await
    }

    pub async fn invalidate(
        &self,
        paths: &[String],
        now: DateTime<Utc>,
    ) -> Result<(), CdnError> {
        let Some(distribution_id) = self.distribution_id.as_deref().filter(|id| !id.is_empty())
        else {
            info!(
                target = "application::invalidation",
                "No distribution configured; skipping"
            );
            return Ok(());
        };

        let reference = self.caller_reference(now);
        let outcome = self
            .client
            .create_invalidation(distribution_id, paths, &reference)
            .await?;

        counter!(METRIC_INVALIDATIONS_TOTAL).increment(1);
        if outcome.http_status == 201 {
            info!(
                target = "application::invalidation",
                distribution_id,
                caller_reference = %reference,
                status = ?outcome.invalidation_status,
                paths = paths.len(),
                "invalidation created"
            );
        } else {
            warn!(
                target = "application::invalidation",
                distribution_id,
                caller_reference = %reference,
                http_status = outcome.http_status,
                "unexpected invalidation response"
            );
        }
        Ok(())
    }

    /// ISO-8601 with microseconds, nudged forward one microsecond when
    /// the clock has not advanced since the previous call so references
    /// never repeat within a process.
    fn caller_reference(&self, now: DateTime<Utc>) -> String {
        let mut last = self
            .last_reference
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut stamp = now;
        if let Some(previous) = *last {
            if stamp <= previous {
                stamp = previous + chrono::Duration::microseconds(1);
            }
        }
        *last = Some(stamp);
        stamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }

    /// GET every sitemap URL with bounded concurrency. Non-2xx and
    /// timed-out responses are logged and counted, never fatal.
    pub async fn warm(&self, urls: &[String]) -> WarmReport {
        let started_at = std::time::Instant::now();
        let mut fetches = Vec::with_capacity(urls.len());
        for url in urls {
            fetches.push(self.warm_one(url));
        }
        let failed: usize = stream::iter(fetches)
            .buffer_unordered(self.warm_concurrency.max(1))
            .fold(0usize, |acc, n| async move { acc + n })
            .await;

        histogram!(METRIC_WARM_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        let report = WarmReport {
            fetched: urls.len() - failed,
            failed,
        };
        info!(
            target = "application::invalidation",
            fetched = report.fetched,
            failed = report.failed,
            "cache warm finished"
        );
        report
    }

    async fn warm_one(&self, url: &String) -> usize {
        let request = self.http.get(url).timeout(self.warm_url_timeout).send();
        match request.await {
            Ok(response) if response.status().is_success() => 0usize,
            Ok(response) => {
                warn!(
                    target = "application::invalidation",
                    url,
                    status = response.status().as_u16(),
                    "warm fetch returned non-success"
                );
                1
            }
            Err(err) => {
                warn!(target = "application::invalidation", url, error = %err, "warm fetch failed");
                1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use chrono::TimeZone;

    use super::*;
    use crate::application::stores::InvalidationOutcome;

    #[derive(Default)]
    struct RecordingCdn {
        calls: StdMutex<Vec<(String, Vec<String>, String)>>,
    }

    #[async_trait]
    impl CdnClient for RecordingCdn {
        async fn create_invalidation(
            &self,
            distribution_id: &str,
            paths: &[String],
            caller_reference: &str,
        ) -> Result<InvalidationOutcome, CdnError> {
            self.calls.lock().unwrap().push((
                distribution_id.to_string(),
                paths.to_vec(),
                caller_reference.to_string(),
            ));
            Ok(InvalidationOutcome {
                http_status: 201,
                invalidation_status: Some("InProgress".to_string()),
            })
        }
    }

    fn invalidator(distribution_id: Option<&str>, cdn: Arc<RecordingCdn>) -> CdnInvalidator {
        CdnInvalidator::new(
            cdn,
            reqwest::Client::new(),
            distribution_id.map(str::to_string),
            DEFAULT_SELECTIVE_TARGETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    #[tokio::test]
    async fn full_invalidation_uses_microsecond_reference() {
        let cdn = Arc::new(RecordingCdn::default());
        let sut = invalidator(Some("testdistribution"), cdn.clone());
        let now = Utc
            .with_ymd_and_hms(2019, 10, 9, 17, 4, 54)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(745_000))
            .unwrap();

        sut.invalidate_full(now).await.unwrap();

        let calls = cdn.calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "testdistribution");
        assert_eq!(calls[0].1, vec!["/*".to_string()]);
        assert_eq!(calls[0].2, "2019-10-09T17:04:54.745000");
    }

    #[tokio::test]
    async fn empty_distribution_id_skips_the_call() {
        let cdn = Arc::new(RecordingCdn::default());
        let sut = invalidator(Some(""), cdn.clone());
        sut.invalidate_full(Utc::now()).await.unwrap();
        assert!(cdn.calls.lock().unwrap().is_empty());

        let cdn = Arc::new(RecordingCdn::default());
        let sut = invalidator(None, cdn.clone());
        sut.invalidate_selective(Utc::now()).await.unwrap();
        assert!(cdn.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn selective_invalidation_sends_configured_targets() {
        let cdn = Arc::new(RecordingCdn::default());
        let sut = invalidator(Some("testdistribution"), cdn.clone());
        sut.invalidate_selective(Utc::now()).await.unwrap();

        let calls = cdn.calls.lock().unwrap().clone();
        assert_eq!(
            calls[0].1,
            vec![
                "events/*".to_string(),
                "people/*".to_string(),
                "topics/*".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn caller_references_never_repeat() {
        let cdn = Arc::new(RecordingCdn::default());
        let sut = invalidator(Some("testdistribution"), cdn.clone());
        let frozen = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();

        for _ in 0..3 {
            sut.invalidate_full(frozen).await.unwrap();
        }

        let calls = cdn.calls.lock().unwrap().clone();
        let refs: Vec<&str> = calls.iter().map(|c| c.2.as_str()).collect();
        assert_eq!(refs.len(), 3);
        let mut unique = refs.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }
}
