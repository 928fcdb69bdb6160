//! RSS 2.0 / Atom parsing into a flat item list.
//!
//! Item identity follows a strict precedence: `guid`, then `link`, then
//! `title + published`. When all three differ across fetches the item is a
//! new sighting; no similarity heuristics are applied.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracklet_core::TorrentRef;

/// Failures surfaced by feed parsing.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The payload is not a recognisable RSS or Atom document.
    #[error("unrecognised feed document")]
    UnknownFormat,
    /// The XML failed to deserialise.
    #[error("malformed feed xml: {message}")]
    Malformed {
        /// Parser error description.
        message: String,
    },
}

/// One feed entry, normalised across RSS and Atom.
#[derive(Debug, Clone)]
pub struct FeedItem {
    /// Entry title; the search key for detail resolution.
    pub title: String,
    /// `guid` (RSS) or `id` (Atom) when present.
    pub guid: Option<String>,
    /// Entry link when present.
    pub link: Option<String>,
    /// Publication timestamp when present.
    pub published: Option<DateTime<Utc>>,
    /// Enclosure URL, usually the `.torrent` download link.
    pub enclosure_url: Option<String>,
}

impl FeedItem {
    /// Stable de-duplication key: `guid` → `link` → `title + published`.
    #[must_use]
    pub fn dedup_key(&self) -> String {
        if let Some(guid) = self.guid.as_deref().filter(|g| !g.trim().is_empty()) {
            return guid.trim().to_string();
        }
        if let Some(link) = self.link.as_deref().filter(|l| !l.trim().is_empty()) {
            return link.trim().to_string();
        }
        match self.published {
            Some(published) => format!("{}@{}", self.title, published.timestamp()),
            None => self.title.clone(),
        }
    }

    /// How the site driver should resolve this item's detail page.
    #[must_use]
    pub fn reference(&self) -> TorrentRef {
        if let Some(guid) = self.guid.as_deref().filter(|g| !g.trim().is_empty()) {
            return TorrentRef::Guid(guid.trim().to_string());
        }
        if let Some(link) = self.link.as_deref().filter(|l| !l.trim().is_empty()) {
            return TorrentRef::Link(link.trim().to_string());
        }
        TorrentRef::Id(self.title.clone())
    }
}

/// Parse a feed document, auto-detecting RSS 2.0 vs Atom. Item order is
/// preserved exactly as the feed delivers it (newest first by convention).
///
/// # Errors
///
/// Returns [`FeedError`] when the document matches neither format or the
/// XML is malformed.
pub fn parse_feed(xml: &str) -> Result<Vec<FeedItem>, FeedError> {
    let head = &xml[..xml.len().min(512)];
    if head.contains("<rss") || head.contains("<channel") {
        let document: RssDocument =
            quick_xml::de::from_str(xml).map_err(|error| FeedError::Malformed {
                message: error.to_string(),
            })?;
        return Ok(document
            .channel
            .items
            .into_iter()
            .map(RssItem::into_feed_item)
            .collect());
    }
    if head.contains("<feed") {
        let document: AtomFeed =
            quick_xml::de::from_str(xml).map_err(|error| FeedError::Malformed {
                message: error.to_string(),
            })?;
        return Ok(document
            .entries
            .into_iter()
            .map(AtomEntry::into_feed_item)
            .collect());
    }
    Err(FeedError::UnknownFormat)
}

#[derive(Debug, Deserialize)]
struct RssDocument {
    channel: RssChannel,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssChannel {
    #[serde(rename = "item")]
    items: Vec<RssItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssItem {
    title: Option<String>,
    link: Option<String>,
    guid: Option<RssGuid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    enclosure: Option<RssEnclosure>,
}

impl RssItem {
    fn into_feed_item(self) -> FeedItem {
        FeedItem {
            title: self.title.unwrap_or_default(),
            guid: self.guid.and_then(|guid| guid.value),
            link: self.link,
            published: self
                .pub_date
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc2822(raw).ok())
                .map(|parsed| parsed.with_timezone(&Utc)),
            enclosure_url: self.enclosure.and_then(|enclosure| enclosure.url),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssGuid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RssEnclosure {
    #[serde(rename = "@url")]
    url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomFeed {
    #[serde(rename = "entry")]
    entries: Vec<AtomEntry>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomEntry {
    title: Option<String>,
    id: Option<String>,
    #[serde(rename = "link")]
    links: Vec<AtomLink>,
    published: Option<String>,
    updated: Option<String>,
}

impl AtomEntry {
    fn into_feed_item(self) -> FeedItem {
        let link = self
            .links
            .iter()
            .find(|link| link.rel.as_deref().is_none_or(|rel| rel == "alternate"))
            .or_else(|| self.links.first())
            .and_then(|link| link.href.clone());
        let enclosure_url = self
            .links
            .iter()
            .find(|link| link.rel.as_deref() == Some("enclosure"))
            .and_then(|link| link.href.clone());
        let published = self
            .published
            .as_deref()
            .or(self.updated.as_deref())
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc));
        FeedItem {
            title: self.title.unwrap_or_default(),
            guid: self.id,
            link,
            published,
            enclosure_url,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: Option<String>,
    #[serde(rename = "@rel")]
    rel: Option<String>,
}
