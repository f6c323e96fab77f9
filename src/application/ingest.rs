//! Feed ingestion.
//!
//! For each enabled source of the scheduled kind, fetches the feed,
//! turns fresh entries into moderated drafts inside one CMS
//! transaction, and advances the source watermark in that same
//! transaction. A failure anywhere rolls the whole source back so the
//! next run retries the same entries.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use tracing::{info, warn};

use crate::application::cms::{CmsAdapter, CmsError, DraftOutcome, DraftPage};
use crate::application::error::JobError;
use crate::application::feed::FeedFetcher;
use crate::application::repos::IngestionSourcesRepo;
use crate::domain::entry::NormalizedEntry;
use crate::domain::types::SourceKind;

const METRIC_DRAFTS_CREATED_TOTAL: &str = "portalbake_drafts_created_total";
const METRIC_INGEST_DUPLICATES_TOTAL: &str = "portalbake_ingest_duplicates_total";

#[derive(Debug, Clone, Default)]
pub struct IngestReport {
    pub sources_processed: usize,
    pub sources_failed: usize,
    pub entries_seen: usize,
    pub drafts_created: usize,
    pub duplicates: usize,
    pub images_stored: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct SourceCounts {
    entries: usize,
    drafts_created: usize,
    duplicates: usize,
    images_stored: usize,
}

pub struct Ingester {
    cms: Arc<dyn CmsAdapter>,
    sources: Arc<dyn IngestionSourcesRepo>,
    fetcher: FeedFetcher,
    http: reqwest::Client,
}

impl Ingester {
    pub fn new(
        cms: Arc<dyn CmsAdapter>,
        sources: Arc<dyn IngestionSourcesRepo>,
        fetcher: FeedFetcher,
        http: reqwest::Client,
    ) -> Self {
        Self {
            cms,
            sources,
            fetcher,
            http,
        }
    }

    /// Ingest every enabled source of `kind`. `started_at` becomes the
    /// new watermark for each source that commits, so entries published
    /// while the run was in flight are picked up next time.
    pub async fn ingest_kind(
        &self,
        kind: SourceKind,
        started_at: DateTime<Utc>,
    ) -> Result<IngestReport, JobError> {
        let sources = self
            .sources
            .list_enabled(kind)
            .await
            .map_err(|err| JobError::transient(format!("listing sources: {err}")))?;

        let mut report = IngestReport::default();
        for source in sources {
            match self
                .ingest_source(source.id, &source.feed_url, source.last_sync, started_at)
                .await
            {
                Ok(counts) => {
                    report.sources_processed += 1;
                    report.entries_seen += counts.entries;
                    report.drafts_created += counts.drafts_created;
                    report.duplicates += counts.duplicates;
                    report.images_stored += counts.images_stored;
                }
                Err(err) => {
                    warn!(
                        target = "application::ingest",
                        source = %source.label,
                        feed_url = %source.feed_url,
                        error = %err,
                        "source ingest rolled back"
                    );
                    report.sources_failed += 1;
                }
            }
        }

        info!(
            target = "application::ingest",
            kind = %kind.as_str(),
            sources_processed = report.sources_processed,
            sources_failed = report.sources_failed,
            "ingest run finished"
        );
        if report.sources_failed > 0 {
            return Err(JobError::permanent(format!(
                "{} of {} sources failed",
                report.sources_failed,
                report.sources_failed + report.sources_processed
            )));
        }
        Ok(report)
    }

    async fn ingest_source(
        &self,
        source_id: uuid::Uuid,
        feed_url: &str,
        last_sync: Option<DateTime<Utc>>,
        started_at: DateTime<Utc>,
    ) -> Result<SourceCounts, CmsError> {
        let mut tx = self.cms.begin().await?;
        let entries = self.fetcher.fetch_new(feed_url, last_sync).await;
        let mut counts = SourceCounts {
            entries: entries.len(),
            ..SourceCounts::default()
        };
        for entry in &entries {
            let slug = entry.identity_slug();
            let image_key = match self.fetch_image(entry).await {
                Some(bytes) => {
                    let key = tx.store_image(&slug, &entry.image_url, &bytes).await?;
                    counts.images_stored += 1;
                    Some(key)
                }
                None => None,
            };

            let outcome = match tx.create_draft(DraftPage::from_entry(entry, image_key)).await {
                Ok(outcome) => outcome,
                Err(err) if err.is_duplicate() => DraftOutcome::AlreadyKnown,
                Err(err) => return Err(err),
            };
            match outcome {
                DraftOutcome::Created { id } => {
                    tx.queue_moderation_notification(id).await?;
                    counts.drafts_created += 1;
                }
                DraftOutcome::AlreadyKnown => counts.duplicates += 1,
            }
        }
        tx.advance_watermark(source_id, started_at).await?;
        tx.commit().await?;
        counter!(METRIC_DRAFTS_CREATED_TOTAL).increment(counts.drafts_created as u64);
        counter!(METRIC_INGEST_DUPLICATES_TOTAL).increment(counts.duplicates as u64);

        info!(
            target = "application::ingest",
            feed_url,
            entries = counts.entries,
            drafts_created = counts.drafts_created,
            watermark = %started_at,
            "source committed"
        );
        Ok(counts)
    }

    async fn fetch_image(&self, entry: &NormalizedEntry) -> Option<Vec<u8>> {
        if entry.image_url.is_empty() {
            return None;
        }
        let response = self
            .http
            .get(&entry.image_url)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());
        match response {
            Ok(resp) => match resp.bytes().await {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(err) => {
                    warn!(
                        target = "application::ingest",
                        image_url = %entry.image_url,
                        error = %err,
                        "image body read failed; continuing without image"
                    );
                    None
                }
            },
            Err(err) => {
                warn!(
                    target = "application::ingest",
                    image_url = %entry.image_url,
                    error = %err,
                    "image fetch failed; continuing without image"
                );
                None
            }
        }
    }
}
