//! Normalized feed entries and their content-derived identity.

use chrono::{DateTime, Datelike, Timelike, Utc};
use sha1::{Digest, Sha1};

/// One feed entry reduced to the fields the portal cares about.
///
/// Never persisted; its identity slug is what survives into the CMS.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEntry {
    pub title: String,
    /// Author display names, in feed order. May be empty.
    pub authors: Vec<String>,
    pub url: String,
    /// Empty string when the feed carried no usable image.
    pub image_url: String,
    pub timestamp: DateTime<Utc>,
}

impl NormalizedEntry {
    /// SHA-1 of the canonical serialization, used as the draft slug.
    ///
    /// Re-ingesting the same entry therefore produces the same slug and
    /// dies on the CMS's slug-uniqueness constraint instead of creating
    /// a duplicate draft.
    pub fn identity_slug(&self) -> String {
        let mut hasher = Sha1::new();
        hasher.update(self.canonical_repr().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Canonical serialization of the entry.
    ///
    /// The format is frozen to the portal's historical one (a Python
    /// dict literal, timestamps rendered as `datetime.datetime(...)`
    /// with a pytz-style `tzinfo=<UTC>`). Changing a single byte here
    /// would re-ingest every known entry under a new slug.
    pub fn canonical_repr(&self) -> String {
        let authors = self
            .authors
            .iter()
            .map(|name| py_string_repr(name))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "{{'title': {}, 'authors': [{}], 'url': {}, 'image_url': {}, 'timestamp': {}}}",
            py_string_repr(&self.title),
            authors,
            py_string_repr(&self.url),
            py_string_repr(&self.image_url),
            py_datetime_repr(self.timestamp),
        )
    }
}

/// Python `repr()` of a string: single-quoted unless the value contains
/// a single quote and no double quote.
fn py_string_repr(value: &str) -> String {
    let quote = if value.contains('\'') && !value.contains('"') {
        '"'
    } else {
        '\''
    };

    let mut out = String::with_capacity(value.len() + 2);
    out.push(quote);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

/// Python `repr()` of an aware UTC datetime. Trailing zero seconds and
/// microseconds are omitted, as CPython does.
fn py_datetime_repr(ts: DateTime<Utc>) -> String {
    let micros = ts.timestamp_subsec_micros();
    let mut fields = format!(
        "{}, {}, {}, {}, {}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute()
    );
    if ts.second() != 0 || micros != 0 {
        fields.push_str(&format!(", {}", ts.second()));
    }
    if micros != 0 {
        fields.push_str(&format!(", {micros}"));
    }
    format!("datetime.datetime({fields}, tzinfo=<UTC>)")
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn ecsy_entry_has_stable_identity_slug() {
        let entry = NormalizedEntry {
            title: "ECSY Developer tools extension".to_string(),
            authors: vec!["Fernando Serrano".to_string()],
            url: "https://blog.mozvr.com/ecsy-developer-tools/".to_string(),
            image_url: "https://blog.mozvr.com/content/images/2019/12/ecsy-header.png"
                .to_string(),
            timestamp: utc(2019, 12, 10, 22, 47, 43),
        };

        assert_eq!(
            entry.identity_slug(),
            "c0a61483f56d003695c55eb33a8da04a5f32cfd2"
        );
    }

    #[test]
    fn identity_covers_quotes_empty_authors_and_zero_seconds() {
        let entry = NormalizedEntry {
            title: "It's a wrap".to_string(),
            authors: vec![],
            url: "https://example.com/wrap".to_string(),
            image_url: String::new(),
            timestamp: utc(2020, 6, 1, 9, 30, 0),
        };

        assert_eq!(
            entry.canonical_repr(),
            "{'title': \"It's a wrap\", 'authors': [], 'url': 'https://example.com/wrap', \
             'image_url': '', 'timestamp': datetime.datetime(2020, 6, 1, 9, 30, tzinfo=<UTC>)}"
        );
        assert_eq!(
            entry.identity_slug(),
            "3e51c2d5a4f8afe2ec3353308e8b24e2620c6ed3"
        );
    }

    #[test]
    fn identity_covers_multiple_authors_and_microseconds() {
        let timestamp = utc(2020, 2, 1, 10, 0, 5) + chrono::Duration::microseconds(250_000);
        let entry = NormalizedEntry {
            title: "Firefox at FOSDEM".to_string(),
            authors: vec!["A. Author".to_string(), "B. Author".to_string()],
            url: "https://example.com/fosdem".to_string(),
            image_url: "https://example.com/img.png".to_string(),
            timestamp,
        };

        assert_eq!(
            entry.identity_slug(),
            "da867ca48d87db86a65259be681db81141f2e8d8"
        );
    }

    #[test]
    fn reingested_entry_is_idempotent_by_slug() {
        let entry = NormalizedEntry {
            title: "Same entry".to_string(),
            authors: vec!["One".to_string()],
            url: "https://example.com/same".to_string(),
            image_url: String::new(),
            timestamp: utc(2021, 3, 4, 5, 6, 7),
        };
        assert_eq!(entry.identity_slug(), entry.clone().identity_slug());
    }
}
