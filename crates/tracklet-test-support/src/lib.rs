#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, missing_docs)]
#![warn(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Shared fixtures for workspace tests: bencode payload builders, feed XML
//! builders, a one-file HTTP server and stub implementations of the core
//! traits.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tracklet_core::{
    PushHandoff, PushOutcome, SearchRequest, Site, SiteError, SiteResult, TorrentItem,
    TorrentPusher, TorrentRef, UserStats,
};

/// Minimal valid single-file torrent payload; parses with any v1 metainfo
/// reader and hashes deterministically for a given `name`.
#[must_use]
pub fn sample_torrent_bytes(name: &str) -> Vec<u8> {
    let announce = "https://tracker.example/announce";
    let pieces = "A".repeat(20);
    format!(
        "d8:announce{}:{announce}4:infod6:lengthi1024e4:name{}:{name}12:piece lengthi16384e6:pieces{}:{pieces}ee",
        announce.len(),
        name.len(),
        pieces.len(),
    )
    .into_bytes()
}

/// Render an RSS 2.0 feed with one `<item>` per `(guid, title, link)`.
#[must_use]
pub fn rss_feed_xml(items: &[(&str, &str, &str)]) -> String {
    let mut body = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\"><channel><title>feed</title>",
    );
    for (guid, title, link) in items {
        body.push_str(&format!(
            "<item><title>{title}</title><link>{link}</link>\
             <guid isPermaLink=\"false\">{guid}</guid>\
             <pubDate>Sun, 01 Feb 2026 08:00:00 +0800</pubDate>\
             <enclosure url=\"{link}\" type=\"application/x-bittorrent\"/></item>"
        ));
    }
    body.push_str("</channel></rss>");
    body
}

/// Spawn a loopback HTTP server answering every request with the same
/// status and body. Returns the base URL and a hit counter.
///
/// # Panics
///
/// Panics when no loopback port can be bound.
pub async fn serve_http(status: u16, body: String) -> (String, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback");
    let addr = listener.local_addr().expect("local addr");
    let hits = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&hits);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);
            let mut buffer = [0_u8; 8192];
            let _ = socket.read(&mut buffer).await;
            let response = format!(
                "HTTP/1.1 {status} Status\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
        }
    });
    (format!("http://{addr}"), hits)
}

/// Scripted [`Site`] implementation.
pub struct StubSite {
    /// Site id reported to callers.
    pub site_id: String,
    /// Items returned by `search`.
    pub search_results: Mutex<Vec<TorrentItem>>,
    /// Item returned by `detail`, keyed by nothing; one answer for all ids.
    pub detail_item: Mutex<Option<TorrentItem>>,
    /// Bytes returned by `download`.
    pub download_bytes: Mutex<Vec<u8>>,
    /// Stats returned by `user_info`.
    pub stats: Mutex<UserStats>,
    /// When set, every operation fails with this message as a network error.
    pub fail_with: Mutex<Option<String>>,
    /// Count of `detail` calls.
    pub detail_calls: AtomicU32,
    /// Count of `download` calls.
    pub download_calls: AtomicU32,
}

impl StubSite {
    /// Stub with empty answers.
    #[must_use]
    pub fn new(site_id: &str) -> Self {
        Self {
            site_id: site_id.to_string(),
            search_results: Mutex::new(Vec::new()),
            detail_item: Mutex::new(None),
            download_bytes: Mutex::new(sample_torrent_bytes("stub")),
            stats: Mutex::new(UserStats::default()),
            fail_with: Mutex::new(None),
            detail_calls: AtomicU32::new(0),
            download_calls: AtomicU32::new(0),
        }
    }

    fn failure(&self) -> Option<SiteError> {
        self.fail_with
            .lock()
            .expect("stub lock")
            .as_ref()
            .map(|message| SiteError::Network {
                site: self.site_id.clone(),
                message: message.clone(),
            })
    }
}

#[async_trait]
impl Site for StubSite {
    fn id(&self) -> &str {
        &self.site_id
    }

    fn display_name(&self) -> &str {
        &self.site_id
    }

    async fn search(&self, _request: &SearchRequest) -> SiteResult<Vec<TorrentItem>> {
        if let Some(error) = self.failure() {
            return Err(error);
        }
        Ok(self.search_results.lock().expect("stub lock").clone())
    }

    async fn detail(&self, reference: &TorrentRef) -> SiteResult<TorrentItem> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure() {
            return Err(error);
        }
        self.detail_item
            .lock()
            .expect("stub lock")
            .clone()
            .ok_or_else(|| SiteError::NotFound {
                site: self.site_id.clone(),
                reference: reference.to_string(),
            })
    }

    async fn user_info(&self) -> SiteResult<UserStats> {
        if let Some(error) = self.failure() {
            return Err(error);
        }
        Ok(self.stats.lock().expect("stub lock").clone())
    }

    async fn download(&self, _id: &str, _hash_token: Option<&str>) -> SiteResult<Vec<u8>> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure() {
            return Err(error);
        }
        Ok(self.download_bytes.lock().expect("stub lock").clone())
    }
}

/// Recording [`TorrentPusher`] stub.
pub struct StubPusher {
    /// Handoffs received, in order.
    pub handoffs: Mutex<Vec<PushHandoff>>,
    /// Outcome returned for each push.
    pub outcome: Mutex<PushOutcome>,
}

impl StubPusher {
    /// Stub that reports success for every push.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handoffs: Mutex::new(Vec::new()),
            outcome: Mutex::new(PushOutcome::Delivered {
                info_hash: "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3".to_string(),
                downloader: "stub-downloader".to_string(),
                already_present: false,
            }),
        }
    }
}

impl Default for StubPusher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TorrentPusher for StubPusher {
    async fn push(&self, handoff: PushHandoff) -> anyhow::Result<PushOutcome> {
        self.handoffs.lock().expect("stub lock").push(handoff);
        Ok(self.outcome.lock().expect("stub lock").clone())
    }
}
