//! Materializes CMS redirect entries as object-store redirect objects.

use thiserror::Error;
use tracing::{debug, warn};

use crate::application::cms::{CmsRedirect, RedirectTarget};
use crate::application::stores::{ObjectStore, ObjectStoreError};

#[derive(Debug, Error)]
pub enum RedirectsError {
    #[error("internal redirect target for {from_path} is not site-relative: {target}")]
    BadInternalTarget { from_path: String, target: String },
    #[error("{} redirect write(s) failed", .0.len())]
    Writes(Vec<(String, ObjectStoreError)>),
}

/// Write one redirect object per record. The object key is the source
/// path without its leading slash. Re-running with the same input is
/// idempotent since writes replace by key.
pub async fn materialize_redirects(
    store: &dyn ObjectStore,
    bucket: &str,
    acl: &str,
    redirects: &[CmsRedirect],
) -> Result<usize, RedirectsError> {
    let mut failures = Vec::new();
    let mut written = 0usize;

    for redirect in redirects {
        let key = redirect.from_path.trim_start_matches('/');
        let destination = match &redirect.target {
            RedirectTarget::Internal(path) => {
                if !path.starts_with('/') {
                    return Err(RedirectsError::BadInternalTarget {
                        from_path: redirect.from_path.clone(),
                        target: path.clone(),
                    });
                }
                path.as_str()
            }
            RedirectTarget::External(url) => url.as_str(),
        };

        match store.put_redirect(bucket, key, destination, acl).await {
            Ok(()) => {
                debug!(
                    target = "application::redirects",
                    key, destination, "redirect written"
                );
                written += 1;
            }
            Err(error) => {
                warn!(
                    target = "application::redirects",
                    key, error = %error, "redirect write failed"
                );
                failures.push((key.to_string(), error));
            }
        }
    }

    if failures.is_empty() {
        Ok(written)
    } else {
        Err(RedirectsError::Writes(failures))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;

    #[derive(Default)]
    struct RecordingStore {
        redirects: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl ObjectStore for RecordingStore {
        async fn put_file(
            &self,
            _bucket: &str,
            _key: &str,
            _body: Bytes,
            _content_type: &str,
            _acl: &str,
        ) -> Result<(), ObjectStoreError> {
            Ok(())
        }

        async fn put_redirect(
            &self,
            _bucket: &str,
            key: &str,
            destination: &str,
            acl: &str,
        ) -> Result<(), ObjectStoreError> {
            self.redirects.lock().unwrap().push((
                key.to_string(),
                destination.to_string(),
                acl.to_string(),
            ));
            Ok(())
        }
    }

    fn sample_redirects() -> Vec<CmsRedirect> {
        vec![
            CmsRedirect {
                from_path: "/old_path/here/".to_string(),
                target: RedirectTarget::Internal("/".to_string()),
            },
            CmsRedirect {
                from_path: "/something".to_string(),
                target: RedirectTarget::External("https://example.com/test/".to_string()),
            },
        ]
    }

    #[tokio::test]
    async fn writes_keys_without_leading_slash() {
        let store = RecordingStore::default();
        let written = materialize_redirects(&store, "bucket", "public-read", &sample_redirects())
            .await
            .unwrap();
        assert_eq!(written, 2);

        let redirects = store.redirects.lock().unwrap().clone();
        assert_eq!(
            redirects,
            vec![
                (
                    "old_path/here/".to_string(),
                    "/".to_string(),
                    "public-read".to_string()
                ),
                (
                    "something".to_string(),
                    "https://example.com/test/".to_string(),
                    "public-read".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn rerun_is_idempotent_by_key() {
        let store = RecordingStore::default();
        let redirects = sample_redirects();
        materialize_redirects(&store, "bucket", "public-read", &redirects)
            .await
            .unwrap();
        materialize_redirects(&store, "bucket", "public-read", &redirects)
            .await
            .unwrap();

        let mut seen = store.redirects.lock().unwrap().clone();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 2);
    }

    #[tokio::test]
    async fn relative_internal_target_fails_the_step() {
        let store = RecordingStore::default();
        let redirects = vec![CmsRedirect {
            from_path: "/broken".to_string(),
            target: RedirectTarget::Internal("no-slash".to_string()),
        }];
        let err = materialize_redirects(&store, "bucket", "public-read", &redirects)
            .await
            .unwrap_err();
        assert!(matches!(err, RedirectsError::BadInternalTarget { .. }));
    }
}
