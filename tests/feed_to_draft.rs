//! Feed-to-draft ingestion against an in-memory CMS with staged-commit
//! transactions. Feeds come from on-disk fixtures; entry image URLs
//! point at an unresolvable host so image fetches fail cleanly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use portalbake::application::cms::{
    CmsAdapter, CmsError, CmsRedirect, CmsTransaction, DraftOutcome, DraftPage, PublicPage,
    PublishReport,
};
use portalbake::application::error::ErrorKind;
use portalbake::application::feed::FeedFetcher;
use portalbake::application::ingest::Ingester;
use portalbake::application::repos::{IngestionSourcesRepo, RepoError};
use portalbake::domain::entities::IngestionSourceRecord;
use portalbake::domain::types::SourceKind;
use url::Url;
use uuid::Uuid;

#[derive(Default)]
struct CmsState {
    drafts: HashMap<String, Uuid>,
    images: Vec<(String, String)>,
    outbox: Vec<Uuid>,
    watermarks: HashMap<Uuid, DateTime<Utc>>,
}

struct MemoryCms {
    state: Arc<Mutex<CmsState>>,
    fail_watermark: bool,
}

impl MemoryCms {
    fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CmsState::default())),
            fail_watermark: false,
        }
    }
}

#[async_trait]
impl CmsAdapter for MemoryCms {
    async fn list_public_pages(&self) -> Result<Vec<PublicPage>, CmsError> {
        Ok(Vec::new())
    }

    async fn render_page(&self, path: &str, _secure: bool) -> Result<String, CmsError> {
        Err(CmsError::Render {
            path: path.to_string(),
            message: "rendering is not part of this fake".to_string(),
        })
    }

    async fn error_page_404(&self, _secure: bool) -> Result<String, CmsError> {
        Ok(String::new())
    }

    async fn sitemap_xml(&self) -> Result<String, CmsError> {
        Ok(String::new())
    }

    async fn sitemap_urls(&self) -> Result<Vec<String>, CmsError> {
        Ok(Vec::new())
    }

    async fn list_redirects(&self) -> Result<Vec<CmsRedirect>, CmsError> {
        Ok(Vec::new())
    }

    async fn publish_scheduled(&self, _now: DateTime<Utc>) -> Result<PublishReport, CmsError> {
        Ok(PublishReport::default())
    }

    async fn begin(&self) -> Result<Box<dyn CmsTransaction>, CmsError> {
        Ok(Box::new(MemoryTx {
            state: Arc::clone(&self.state),
            fail_watermark: self.fail_watermark,
            staged_drafts: Vec::new(),
            staged_images: Vec::new(),
            staged_outbox: Vec::new(),
            staged_watermarks: Vec::new(),
        }))
    }
}

struct MemoryTx {
    state: Arc<Mutex<CmsState>>,
    fail_watermark: bool,
    staged_drafts: Vec<(String, Uuid)>,
    staged_images: Vec<(String, String)>,
    staged_outbox: Vec<Uuid>,
    staged_watermarks: Vec<(Uuid, DateTime<Utc>)>,
}

#[async_trait]
impl CmsTransaction for MemoryTx {
    async fn create_draft(&mut self, draft: DraftPage) -> Result<DraftOutcome, CmsError> {
        let committed = self.state.lock().unwrap();
        let duplicate = committed.drafts.contains_key(&draft.slug)
            || self.staged_drafts.iter().any(|(slug, _)| *slug == draft.slug);
        drop(committed);
        if duplicate {
            return Ok(DraftOutcome::AlreadyKnown);
        }
        let id = Uuid::new_v4();
        self.staged_drafts.push((draft.slug, id));
        Ok(DraftOutcome::Created { id })
    }

    async fn store_image(
        &mut self,
        slug: &str,
        _url: &str,
        _body: &[u8],
    ) -> Result<String, CmsError> {
        let key = format!("draft-images/{slug}");
        self.staged_images.push((slug.to_string(), key.clone()));
        Ok(key)
    }

    async fn queue_moderation_notification(&mut self, draft_id: Uuid) -> Result<(), CmsError> {
        self.staged_outbox.push(draft_id);
        Ok(())
    }

    async fn advance_watermark(
        &mut self,
        source_id: Uuid,
        to: DateTime<Utc>,
    ) -> Result<(), CmsError> {
        if self.fail_watermark {
            return Err(CmsError::Persistence("watermark write refused".to_string()));
        }
        self.staged_watermarks.push((source_id, to));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), CmsError> {
        let mut state = self.state.lock().unwrap();
        for (slug, id) in self.staged_drafts {
            state.drafts.insert(slug, id);
        }
        state.images.extend(self.staged_images);
        state.outbox.extend(self.staged_outbox);
        for (source_id, to) in self.staged_watermarks {
            let entry = state.watermarks.entry(source_id).or_insert(to);
            if to > *entry {
                *entry = to;
            }
        }
        Ok(())
    }
}

struct StaticSources {
    records: Vec<IngestionSourceRecord>,
}

#[async_trait]
impl IngestionSourcesRepo for StaticSources {
    async fn list_enabled(
        &self,
        kind: SourceKind,
    ) -> Result<Vec<IngestionSourceRecord>, RepoError> {
        Ok(self
            .records
            .iter()
            .filter(|record| record.kind == kind && record.enabled)
            .cloned()
            .collect())
    }
}

fn fixture_url(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    Url::from_file_path(path).unwrap().to_string()
}

fn video_source(last_sync: Option<DateTime<Utc>>) -> IngestionSourceRecord {
    IngestionSourceRecord {
        id: Uuid::new_v4(),
        label: "Portal videos".to_string(),
        feed_url: fixture_url("videos_atom.xml"),
        kind: SourceKind::ExternalVideo,
        enabled: true,
        last_sync,
    }
}

fn ingester_with(cms: MemoryCms, source: IngestionSourceRecord) -> (Ingester, Arc<Mutex<CmsState>>, Uuid) {
    let state = Arc::clone(&cms.state);
    let source_id = source.id;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    let ingester = Ingester::new(
        Arc::new(cms),
        Arc::new(StaticSources {
            records: vec![source],
        }),
        FeedFetcher::new(http.clone(), 50),
        http,
    );
    (ingester, state, source_id)
}

#[tokio::test]
async fn fresh_source_creates_drafts_and_queues_notifications() {
    let (ingester, state, source_id) = ingester_with(MemoryCms::new(), video_source(None));
    let started_at = Utc::now();

    let report = ingester
        .ingest_kind(SourceKind::ExternalVideo, started_at)
        .await
        .unwrap();

    assert_eq!(report.sources_processed, 1);
    assert_eq!(report.sources_failed, 0);
    assert_eq!(report.entries_seen, 2);
    assert_eq!(report.drafts_created, 2);
    assert_eq!(report.duplicates, 0);

    let state = state.lock().unwrap();
    assert_eq!(state.drafts.len(), 2);
    assert_eq!(state.outbox.len(), 2);
    assert_eq!(state.watermarks.get(&source_id), Some(&started_at));
}

#[tokio::test]
async fn rerun_without_watermark_counts_duplicates_only() {
    let (ingester, state, _) = ingester_with(MemoryCms::new(), video_source(None));

    let first = Utc::now();
    ingester
        .ingest_kind(SourceKind::ExternalVideo, first)
        .await
        .unwrap();

    // The source record in this fake keeps last_sync = None, so the
    // second run sees the same entries again and must dedupe by slug.
    let report = ingester
        .ingest_kind(SourceKind::ExternalVideo, Utc::now())
        .await
        .unwrap();

    assert_eq!(report.entries_seen, 2);
    assert_eq!(report.drafts_created, 0);
    assert_eq!(report.duplicates, 2);

    let state = state.lock().unwrap();
    assert_eq!(state.drafts.len(), 2);
    assert_eq!(state.outbox.len(), 2);
}

#[tokio::test]
async fn watermark_filters_already_seen_entries() {
    let last_sync = Utc.with_ymd_and_hms(2019, 12, 15, 0, 0, 0).unwrap();
    let (ingester, state, _) = ingester_with(MemoryCms::new(), video_source(Some(last_sync)));

    let report = ingester
        .ingest_kind(SourceKind::ExternalVideo, Utc::now())
        .await
        .unwrap();

    // Only the 2019-12-18 entry is newer than the watermark.
    assert_eq!(report.entries_seen, 1);
    assert_eq!(report.drafts_created, 1);
    assert_eq!(state.lock().unwrap().drafts.len(), 1);
}

#[tokio::test]
async fn watermark_failure_rolls_back_the_whole_source() {
    let mut cms = MemoryCms::new();
    cms.fail_watermark = true;
    let (ingester, state, source_id) = ingester_with(cms, video_source(None));

    let err = ingester
        .ingest_kind(SourceKind::ExternalVideo, Utc::now())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Permanent);

    let state = state.lock().unwrap();
    assert!(state.drafts.is_empty());
    assert!(state.outbox.is_empty());
    assert!(state.images.is_empty());
    assert!(!state.watermarks.contains_key(&source_id));
}

#[tokio::test]
async fn committed_watermark_never_moves_backwards() {
    let (ingester, state, source_id) = ingester_with(MemoryCms::new(), video_source(None));

    let future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
    state
        .lock()
        .unwrap()
        .watermarks
        .insert(source_id, future);

    ingester
        .ingest_kind(SourceKind::ExternalVideo, Utc::now())
        .await
        .unwrap();

    assert_eq!(state.lock().unwrap().watermarks.get(&source_id), Some(&future));
}

#[tokio::test]
async fn unparseable_feed_commits_an_empty_run() {
    let mut source = video_source(None);
    source.feed_url = fixture_url("not_a_feed.txt");
    let started_at = Utc::now();
    let (ingester, state, source_id) = ingester_with(MemoryCms::new(), source);

    let report = ingester
        .ingest_kind(SourceKind::ExternalVideo, started_at)
        .await
        .unwrap();

    // Fetch problems are non-fatal: the source's transaction still
    // commits, advancing the watermark over an empty entry set.
    assert_eq!(report.sources_processed, 1);
    assert_eq!(report.sources_failed, 0);
    assert_eq!(report.entries_seen, 0);
    assert_eq!(report.drafts_created, 0);

    let state = state.lock().unwrap();
    assert!(state.drafts.is_empty());
    assert_eq!(state.watermarks.get(&source_id), Some(&started_at));
}
