use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A normalized syndication feed.
///
/// Identity across polls is the `feed_url` the document was fetched from,
/// never its content. Entries keep the order of the source document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Feed {
    /// Feed title as published by the source
    pub title: Option<String>,
    /// Site (HTML) link advertised by the feed
    pub url: Option<String>,
    /// URL the feed was fetched from
    pub feed_url: Option<String>,
    pub description: Option<String>,
    /// Opaque ETag from the last successful response
    pub etag: Option<String>,
    /// Last-Modified from the last successful response
    pub last_modified: Option<DateTime<Utc>>,
    /// Suggested polling interval in minutes (RSS `<ttl>`)
    pub ttl: Option<u32>,
    /// Name of the parser descriptor that produced this feed
    pub parser: Option<String>,
    pub entries: Vec<Entry>,
}

impl Feed {
    /// Empty feed for a URL, used when the server answered 304 Not Modified.
    pub fn not_modified(
        feed_url: impl Into<String>,
        etag: Option<String>,
        last_modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            feed_url: Some(feed_url.into()),
            etag,
            last_modified,
            ..Self::default()
        }
    }

    /// True when the feed carries no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A single item (article, post, episode) within a feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Entry {
    /// Format-specific identifier (RSS `guid`, Atom `id`)
    pub id: Option<String>,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub summary: Option<String>,
    pub content: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub categories: Vec<String>,
}

/// An undecoded-by-parser response body plus the freshness metadata that came with it.
///
/// `bytes` have already been through content decoding (gzip/deflate).
#[derive(Debug, Clone, PartialEq)]
pub struct RawBody {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RawBody {
    /// Body as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}
