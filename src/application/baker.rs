//! Static-site baker.
//!
//! Renders every live public page into a timestamped build directory,
//! uploads the tree to the object store, materializes redirects, and
//! triggers a full CDN invalidation. The build directory is transient
//! and is removed whether the run succeeds or fails.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use metrics::histogram;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::cms::{CmsAdapter, CmsError};
use crate::application::invalidation::CdnInvalidator;
use crate::application::redirects::{RedirectsError, materialize_redirects};
use crate::application::stores::{ObjectStore, UploadDirectoryError, upload_directory};

const METRIC_BUILD_MS: &str = "portalbake_build_duration_ms";

#[derive(Debug, Error)]
pub enum BakeError {
    #[error(transparent)]
    Cms(#[from] CmsError),
    #[error("build io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Upload(#[from] UploadDirectoryError),
    #[error(transparent)]
    Redirects(#[from] RedirectsError),
}

#[derive(Debug, Clone)]
pub struct BakeReport {
    pub build_dir: PathBuf,
    pub pages_rendered: usize,
    pub pages_skipped: usize,
    pub files_uploaded: usize,
    pub redirects_written: usize,
}

#[derive(Debug, Clone)]
pub struct BakerConfig {
    pub build_root: PathBuf,
    pub bucket: String,
    pub acl: String,
    pub upload_concurrency: usize,
    /// Render absolute links with the https scheme.
    pub force_https: bool,
}

pub struct Baker {
    cms: Arc<dyn CmsAdapter>,
    store: Arc<dyn ObjectStore>,
    invalidator: Arc<CdnInvalidator>,
    config: BakerConfig,
}

/// Per-run output directory under the build root, named by the run's
/// UTC timestamp at microsecond precision so concurrent runs can never
/// clash on disk.
pub fn build_dir_for(build_root: &Path, now: DateTime<Utc>) -> PathBuf {
    build_root.join(now.to_rfc3339_opts(SecondsFormat::Micros, false))
}

impl Baker {
    pub fn new(
        cms: Arc<dyn CmsAdapter>,
        store: Arc<dyn ObjectStore>,
        invalidator: Arc<CdnInvalidator>,
        config: BakerConfig,
    ) -> Self {
        Self {
            cms,
            store,
            invalidator,
            config,
        }
    }

    pub fn build_root(&self) -> &Path {
        &self.config.build_root
    }

    /// Run one complete bake. The directory named in the report has
    /// already been deleted by the time this returns.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<BakeReport, BakeError> {
        let started_at = std::time::Instant::now();
        let build_dir = build_dir_for(&self.config.build_root, now);
        let outcome = self.bake_into(&build_dir, now).await;
        if outcome.is_ok() {
            histogram!(METRIC_BUILD_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        }
        if let Err(err) = tokio::fs::remove_dir_all(&build_dir).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    target = "application::baker",
                    build_dir = %build_dir.display(),
                    error = %err,
                    "failed to remove build directory"
                );
            }
        }
        outcome
    }

    async fn bake_into(
        &self,
        build_dir: &Path,
        now: DateTime<Utc>,
    ) -> Result<BakeReport, BakeError> {
        create_dir(build_dir).await?;
        info!(
            target = "application::baker",
            build_dir = %build_dir.display(),
            "bake started"
        );

        let secure = self.config.force_https;
        let pages = self.cms.list_public_pages().await?;
        let mut rendered = 0usize;
        let mut skipped = 0usize;

        for page in &pages {
            match self.cms.render_page(&page.path, secure).await {
                Ok(body) => {
                    let path = page_build_path(build_dir, &page.path);
                    write_file(&path, body.as_bytes()).await?;
                    rendered += 1;
                }
                Err(err) => {
                    warn!(
                        target = "application::baker",
                        path = %page.path,
                        error = %err,
                        "page render failed; skipping"
                    );
                    skipped += 1;
                }
            }
        }

        let not_found = self.cms.error_page_404(secure).await?;
        write_file(&build_dir.join("404.html"), not_found.as_bytes()).await?;
        let sitemap = self.cms.sitemap_xml().await?;
        write_file(&build_dir.join("sitemap.xml"), sitemap.as_bytes()).await?;

        let files_uploaded = upload_directory(
            self.store.as_ref(),
            &self.config.bucket,
            build_dir,
            &self.config.acl,
            self.config.upload_concurrency,
        )
        .await?;

        let redirects = self.cms.list_redirects().await?;
        let redirects_written = materialize_redirects(
            self.store.as_ref(),
            &self.config.bucket,
            &self.config.acl,
            &redirects,
        )
        .await?;

        // Invalidation trouble never fails a bake that already uploaded.
        if let Err(err) = self.invalidator.invalidate_full(now).await {
            warn!(
                target = "application::baker",
                error = %err,
                "full cdn invalidation failed after bake"
            );
        }

        let report = BakeReport {
            build_dir: build_dir.to_path_buf(),
            pages_rendered: rendered,
            pages_skipped: skipped,
            files_uploaded,
            redirects_written,
        };
        info!(
            target = "application::baker",
            pages_rendered = report.pages_rendered,
            pages_skipped = report.pages_skipped,
            files_uploaded = report.files_uploaded,
            redirects_written = report.redirects_written,
            "bake finished"
        );
        Ok(report)
    }
}

fn page_build_path(build_dir: &Path, url_path: &str) -> PathBuf {
    let mut path = build_dir.to_path_buf();
    for segment in url_path.split('/').filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    path.join("index.html")
}

async fn create_dir(path: &Path) -> Result<(), BakeError> {
    tokio::fs::create_dir_all(path).await.map_err(|source| BakeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

async fn write_file(path: &Path, bytes: &[u8]) -> Result<(), BakeError> {
    if let Some(parent) = path.parent() {
        create_dir(parent).await?;
    }
    tokio::fs::write(path, bytes).await.map_err(|source| BakeError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn build_dir_is_timestamped_under_root() {
        let now = Utc
            .with_ymd_and_hms(2001, 12, 25, 1, 23, 45)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(123_456))
            .unwrap();
        let dir = build_dir_for(Path::new("/path/to/build/dir/"), now);
        assert_eq!(
            dir,
            PathBuf::from("/path/to/build/dir/2001-12-25T01:23:45.123456+00:00")
        );
    }

    #[test]
    fn page_paths_nest_under_build_dir() {
        let build_dir = Path::new("/tmp/bake");
        assert_eq!(
            page_build_path(build_dir, "/"),
            PathBuf::from("/tmp/bake/index.html")
        );
        assert_eq!(
            page_build_path(build_dir, "/topics/css/"),
            PathBuf::from("/tmp/bake/topics/css/index.html")
        );
    }
}
