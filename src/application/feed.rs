//! Feed fetching and normalization.
//!
//! Pulls an RSS or Atom document, filters out entries older than the
//! source watermark, and flattens the rest into [`NormalizedEntry`]
//! values. Every failure mode here is non-fatal: a broken feed yields
//! an empty batch and a warning, never an error.

use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use tracing::{debug, warn};
use url::Url;

use crate::domain::entry::NormalizedEntry;

pub const DEFAULT_MAX_ENTRIES: usize = 200;

#[derive(Clone)]
pub struct FeedFetcher {
    http: reqwest::Client,
    max_entries: usize,
}

impl FeedFetcher {
    pub fn new(http: reqwest::Client, max_entries: usize) -> Self {
        Self { http, max_entries }
    }

    /// Fetch `feed_url` and return the entries newer than `last_synced`,
    /// in feed order (assumed newest first). `file://` URLs are read
    /// from disk, which the fixture tests rely on.
    pub async fn fetch_new(
        &self,
        feed_url: &str,
        last_synced: Option<DateTime<Utc>>,
    ) -> Vec<NormalizedEntry> {
        let body = match self.read_body(feed_url).await {
            Ok(body) => body,
            Err(message) => {
                warn!(
                    target = "application::feed",
                    feed_url, error = %message, "feed fetch failed"
                );
                return Vec::new();
            }
        };

        let feed = match feed_rs::parser::parse(body.as_slice()) {
            Ok(feed) => feed,
            Err(err) => {
                warn!(
                    target = "application::feed",
                    feed_url, error = %err, "feed parse failed"
                );
                return Vec::new();
            }
        };

        if let (Some(updated), Some(watermark)) = (feed.updated, last_synced) {
            if updated <= watermark {
                debug!(
                    target = "application::feed",
                    feed_url, %updated, %watermark, "feed unchanged since last sync"
                );
                return Vec::new();
            }
        }

        let mut out = Vec::new();
        for entry in feed.entries {
            if out.len() >= self.max_entries {
                break;
            }
            let Some(normalized) = normalize_entry(&entry) else {
                debug!(
                    target = "application::feed",
                    feed_url,
                    entry_id = %entry.id,
                    "skipping entry without link or timestamp"
                );
                continue;
            };
            if let Some(watermark) = last_synced {
                if normalized.timestamp <= watermark {
                    break;
                }
            }
            out.push(normalized);
        }
        out
    }

    async fn read_body(&self, feed_url: &str) -> Result<Vec<u8>, String> {
        let parsed = Url::parse(feed_url).map_err(|err| err.to_string())?;
        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|()| format!("bad file url: {feed_url}"))?;
            return tokio::fs::read(path).await.map_err(|err| err.to_string());
        }
        let response = self
            .http
            .get(parsed)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| err.to_string())?;
        let bytes = response.bytes().await.map_err(|err| err.to_string())?;
        Ok(bytes.to_vec())
    }
}

fn normalize_entry(entry: &Entry) -> Option<NormalizedEntry> {
    let url = entry.links.first().map(|link| link.href.clone())?;
    let timestamp = entry.published.or(entry.updated)?;
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.clone())
        .unwrap_or_default();
    let authors = entry
        .authors
        .iter()
        .map(|person| person.name.clone())
        .collect();

    Some(NormalizedEntry {
        title,
        authors,
        url,
        image_url: entry_image(entry),
        timestamp,
    })
}

/// First media thumbnail wins; otherwise the first media content that
/// declares an image type; otherwise empty.
fn entry_image(entry: &Entry) -> String {
    for media in &entry.media {
        if let Some(thumb) = media.thumbnails.first() {
            return thumb.image.uri.clone();
        }
    }
    for media in &entry.media {
        for content in &media.content {
            let is_image = content
                .content_type
                .as_ref()
                .map(|mime| mime.ty().as_str() == mime_guess::mime::IMAGE)
                .unwrap_or(false);
            if is_image {
                if let Some(url) = &content.url {
                    return url.to_string();
                }
            }
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn fixture_url(name: &str) -> String {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests/fixtures")
            .join(name);
        Url::from_file_path(path).unwrap().to_string()
    }

    fn fetcher() -> FeedFetcher {
        FeedFetcher::new(reqwest::Client::new(), DEFAULT_MAX_ENTRIES)
    }

    #[tokio::test]
    async fn watermark_limits_rss_batch() {
        let url = fixture_url("blog_rss.xml");
        let watermark = Utc.with_ymd_and_hms(2019, 12, 1, 0, 0, 0).unwrap();

        let recent = fetcher().fetch_new(&url, Some(watermark)).await;
        assert_eq!(recent.len(), 6);

        let older = Utc.with_ymd_and_hms(2019, 8, 1, 0, 0, 0).unwrap();
        let all = fetcher().fetch_new(&url, Some(older)).await;
        assert_eq!(all.len(), 15);
        for (a, b) in recent.iter().zip(all.iter()) {
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn unchanged_feed_short_circuits() {
        let url = fixture_url("blog_rss.xml");
        // lastBuildDate in the fixture is 2019-12-20.
        let watermark = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let entries = fetcher().fetch_new(&url, Some(watermark)).await;
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn normalizes_known_entry() {
        let url = fixture_url("blog_rss.xml");
        let older = Utc.with_ymd_and_hms(2019, 8, 1, 0, 0, 0).unwrap();
        let all = fetcher().fetch_new(&url, Some(older)).await;

        let ecsy = all
            .iter()
            .find(|e| e.url == "https://blog.mozvr.com/ecsy-developer-tools/")
            .unwrap();
        assert_eq!(ecsy.title, "ECSY Developer tools extension");
        assert_eq!(ecsy.authors, vec!["Fernando Serrano".to_string()]);
        assert_eq!(
            ecsy.image_url,
            "https://blog.mozvr.com/content/images/2019/12/ecsy-header.png"
        );
        assert_eq!(
            ecsy.timestamp,
            Utc.with_ymd_and_hms(2019, 12, 10, 22, 47, 43).unwrap()
        );
    }

    #[tokio::test]
    async fn atom_thumbnail_preferred_over_content() {
        let url = fixture_url("videos_atom.xml");
        let entries = fetcher().fetch_new(&url, None).await;
        assert!(!entries.is_empty());
        assert_eq!(
            entries[0].image_url,
            "https://videos.example.com/thumbs/intro.jpg"
        );
    }

    #[tokio::test]
    async fn broken_feed_yields_empty_batch() {
        let url = fixture_url("not_a_feed.txt");
        let entries = fetcher().fetch_new(&url, None).await;
        assert!(entries.is_empty());

        let missing = fetcher()
            .fetch_new("file:///definitely/not/here.xml", None)
            .await;
        assert!(missing.is_empty());
    }
}
