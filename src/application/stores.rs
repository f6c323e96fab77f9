//! Object-store and CDN client seams.
//!
//! The traits live here so the baker, redirect materializer and
//! invalidator can be exercised against recording fakes; the AWS-backed
//! implementations are in `infra::object_store` and `infra::cdn`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use metrics::counter;
use thiserror::Error;
use tracing::{debug, warn};

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

const METRIC_UPLOADS_TOTAL: &str = "portalbake_uploads_total";
const METRIC_UPLOAD_FAILURES_TOTAL: &str = "portalbake_upload_failures_total";

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store request failed: {0}")]
    Request(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// S3-compatible PUT surface. All writes are idempotent replaces.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        acl: &str,
    ) -> Result<(), ObjectStoreError>;

    /// Write a zero-byte object whose metadata redirects the website
    /// endpoint to `destination`. Destinations are passed through
    /// verbatim, relative or absolute.
    async fn put_redirect(
        &self,
        bucket: &str,
        key: &str,
        destination: &str,
        acl: &str,
    ) -> Result<(), ObjectStoreError>;
}

/// One failed upload out of a directory sync.
#[derive(Debug)]
pub struct UploadFailure {
    pub key: String,
    pub error: ObjectStoreError,
}

#[derive(Debug, Error)]
#[error("{} upload(s) failed, first: {first}", failures.len())]
pub struct UploadDirectoryError {
    pub failures: Vec<UploadFailure>,
    first: String,
}

impl UploadDirectoryError {
    fn new(failures: Vec<UploadFailure>) -> Self {
        let first = failures
            .first()
            .map(|f| format!("{}: {}", f.key, f.error))
            .unwrap_or_default();
        Self { failures, first }
    }
}

/// Walk `local_root` and upload every file, keys mirroring the path
/// relative to the root. Content types are guessed by extension.
/// Individual failures do not abort the rest; the operation fails
/// overall iff any upload failed.
pub async fn upload_directory(
    store: &dyn ObjectStore,
    bucket: &str,
    local_root: &Path,
    acl: &str,
    concurrency: usize,
) -> Result<usize, UploadDirectoryError> {
    let entries = collect_files(local_root);
    let total = entries.len();

    let failures: Vec<UploadFailure> = stream::iter(entries)
        .map(|(key, path)| async move {
            let body = match tokio::fs::read(&path).await {
                Ok(bytes) => Bytes::from(bytes),
                Err(err) => {
                    return Some(UploadFailure {
                        key,
                        error: ObjectStoreError::Io(err),
                    });
                }
            };
            let content_type = mime_guess::from_path(&path)
                .first_raw()
                .unwrap_or(FALLBACK_CONTENT_TYPE);

            match store.put_file(bucket, &key, body, content_type, acl).await {
                Ok(()) => {
                    debug!(target = "application::stores", key, "uploaded");
                    None
                }
                Err(error) => {
                    warn!(
                        target = "application::stores",
                        key,
                        error = %error,
                        "upload failed"
                    );
                    Some(UploadFailure { key, error })
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|outcome| async move { outcome })
        .collect()
        .await;

    counter!(METRIC_UPLOADS_TOTAL).increment((total - failures.len()) as u64);
    if failures.is_empty() {
        Ok(total)
    } else {
        counter!(METRIC_UPLOAD_FAILURES_TOTAL).increment(failures.len() as u64);
        Err(UploadDirectoryError::new(failures))
    }
}

fn collect_files(local_root: &Path) -> Vec<(String, PathBuf)> {
    walkdir::WalkDir::new(local_root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let key = entry
                .path()
                .strip_prefix(local_root)
                .ok()?
                .to_string_lossy()
                .replace('\\', "/");
            Some((key, entry.path().to_path_buf()))
        })
        .collect()
}

/// CloudFront-compatible invalidation surface.
#[derive(Debug, Error)]
pub enum CdnError {
    #[error("cdn request failed: {0}")]
    Request(String),
}

/// Outcome of a `CreateInvalidation` call, raw enough for the caller to
/// log the unexpected cases without retrying them.
#[derive(Debug, Clone)]
pub struct InvalidationOutcome {
    pub http_status: u16,
    pub invalidation_status: Option<String>,
}

#[async_trait]
pub trait CdnClient: Send + Sync {
    async fn create_invalidation(
        &self,
        distribution_id: &str,
        paths: &[String],
        caller_reference: &str,
    ) -> Result<InvalidationOutcome, CdnError>;
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct RecordingStore {
        puts: Mutex<Vec<(String, String, usize)>>,
        fail_keys: Vec<String>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_file(
            &self,
            _bucket: &str,
            key: &str,
            body: Bytes,
            content_type: &str,
            _acl: &str,
        ) -> Result<(), ObjectStoreError> {
            if self.fail_keys.iter().any(|k| k == key) {
                return Err(ObjectStoreError::Request("simulated outage".to_string()));
            }
            self.puts.lock().unwrap().push((
                key.to_string(),
                content_type.to_string(),
                body.len(),
            ));
            Ok(())
        }

        async fn put_redirect(
            &self,
            _bucket: &str,
            _key: &str,
            _destination: &str,
            _acl: &str,
        ) -> Result<(), ObjectStoreError> {
            Ok(())
        }
    }

    fn write_tree(root: &Path) {
        std::fs::create_dir_all(root.join("topics/css")).unwrap();
        std::fs::write(root.join("index.html"), b"<html>home</html>").unwrap();
        std::fs::write(root.join("topics/css/index.html"), b"<html>css</html>").unwrap();
        std::fs::write(root.join("sitemap.xml"), b"<urlset/>").unwrap();
        std::fs::write(root.join("blob"), b"\x00\x01").unwrap();
    }

    #[tokio::test]
    async fn uploads_tree_with_guessed_content_types() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let store = RecordingStore::default();

        let uploaded = upload_directory(&store, "bucket", dir.path(), "public-read", 8)
            .await
            .unwrap();
        assert_eq!(uploaded, 4);

        let mut puts = store.puts.lock().unwrap().clone();
        puts.sort();
        assert_eq!(puts[0].0, "blob");
        assert_eq!(puts[0].1, FALLBACK_CONTENT_TYPE);
        assert!(puts.iter().any(|p| p.0 == "index.html" && p.1 == "text/html"));
        assert!(puts.iter().any(|p| p.0 == "topics/css/index.html"));
        assert!(puts.iter().any(|p| p.0 == "sitemap.xml" && p.1 == "text/xml"));
    }

    #[tokio::test]
    async fn one_failed_upload_does_not_abort_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        write_tree(dir.path());
        let store = RecordingStore {
            fail_keys: vec!["sitemap.xml".to_string()],
            ..Default::default()
        };

        let err = upload_directory(&store, "bucket", dir.path(), "public-read", 2)
            .await
            .unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.failures[0].key, "sitemap.xml");
        // The three healthy files still made it.
        assert_eq!(store.puts.lock().unwrap().len(), 3);
    }
}
