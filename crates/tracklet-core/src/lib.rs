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

//! Site-agnostic tracker interfaces and DTOs shared across the workspace.
//!
//! Every tracker backend, whatever protocol it speaks, is exposed through the
//! [`Site`] trait; every torrent client is exposed through
//! [`DownloaderClient`]. The rest of the workspace only ever sees these two
//! traits plus the data carriers in [`model`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub mod error;
pub mod model;
pub mod push;

pub use error::{DownloaderError, DownloaderResult, ErrorKind, SiteError, SiteResult};
pub use push::{PushHandoff, PushOutcome, TorrentPusher};
pub use model::{
    AddTorrentRequest, AuthMethod, DiscountLevel, DownloadSource, DownloaderDirectory,
    DownloaderKind, DownloaderSetting, FilterRule, MatchField, PatternType, RemoteTask, RssFeed,
    SearchRequest, SiteConfig, SortField, TaskProgress, TorrentItem, TorrentRecord, TorrentRef,
    UserStats,
};

/// Unified capability set implemented by every tracker backend.
///
/// Implementations are expected to be cheap to clone behind an [`Arc`] and
/// safe for concurrent use; rate limiting and URL failover live below this
/// trait, callers never deal with either.
#[async_trait]
pub trait Site: Send + Sync {
    /// Stable site identifier (the definition id, e.g. `"hdsky"`).
    fn id(&self) -> &str;

    /// Human-readable site name.
    fn display_name(&self) -> &str;

    /// Establish a session. Cookie-backed sites carry a long-lived cookie and
    /// accept the default no-op.
    async fn login(&self) -> SiteResult<()> {
        Ok(())
    }

    /// Keyword search honoring the request's category, free-only, seeder and
    /// size bounds where the backend supports them.
    async fn search(&self, request: &SearchRequest) -> SiteResult<Vec<TorrentItem>>;

    /// One-shot detail fetch, used by the RSS pipeline when the feed itself
    /// lacks promotion metadata.
    async fn detail(&self, reference: &TorrentRef) -> SiteResult<TorrentItem>;

    /// Account statistics for the configured user.
    async fn user_info(&self) -> SiteResult<UserStats>;

    /// Fetch raw `.torrent` bytes. Some schemata require a secondary hash
    /// token scraped from the detail page.
    async fn download(&self, id: &str, hash_token: Option<&str>) -> SiteResult<Vec<u8>>;
}

/// Resolves live [`Site`] instances for consumers that only know site ids
/// (scheduler, search fan-out, account aggregator).
pub trait SiteProvider: Send + Sync {
    /// Look up a constructed site by id; `None` when unknown or disabled.
    fn get(&self, site_id: &str) -> Option<Arc<dyn Site>>;

    /// All currently enabled sites, in deterministic id order.
    fn enabled(&self) -> Vec<Arc<dyn Site>>;
}

/// Durable journal for sliding-window rate-limit hits.
///
/// The limiter appends one timestamp per issued request and replays the
/// surviving window on startup, so a process restart cannot reset a site's
/// hourly budget.
#[async_trait]
pub trait RateLimitJournal: Send + Sync {
    /// Append a request timestamp for the site.
    async fn record_hit(&self, site_id: &str, at: DateTime<Utc>) -> anyhow::Result<()>;

    /// Load all journalled timestamps for the site at or after `since`.
    async fn load_hits(&self, site_id: &str, since: DateTime<Utc>)
    -> anyhow::Result<Vec<DateTime<Utc>>>;

    /// Drop journalled timestamps older than `before`, across all sites.
    async fn prune_hits(&self, before: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Minimal control surface of a torrent client backend.
///
/// One instance speaks to one remote daemon; the dispatch layer owns
/// construction and caching.
#[async_trait]
pub trait DownloaderClient: Send + Sync {
    /// Cheap reachability probe used by health checks, never by the hot path.
    async fn ping(&self) -> DownloaderResult<()>;

    /// Look the torrent up by info-hash; `Some` when the client already has
    /// it, which the dispatcher treats as an idempotent success.
    async fn find_task(&self, hash: &str) -> DownloaderResult<Option<RemoteTask>>;

    /// Upload torrent metainfo and start (or queue) the transfer.
    async fn add_torrent(&self, request: &AddTorrentRequest) -> DownloaderResult<RemoteTask>;

    /// Progress snapshot for a task identified by info-hash.
    async fn progress(&self, hash: &str) -> DownloaderResult<TaskProgress>;

    /// Pause the task.
    async fn pause(&self, hash: &str) -> DownloaderResult<()>;

    /// Resume a paused task.
    async fn resume(&self, hash: &str) -> DownloaderResult<()>;

    /// Remove the task, optionally deleting downloaded data.
    async fn remove(&self, hash: &str, delete_data: bool) -> DownloaderResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSite;

    #[async_trait]
    impl Site for StubSite {
        fn id(&self) -> &str {
            "stub"
        }

        fn display_name(&self) -> &str {
            "Stub"
        }

        async fn search(&self, _request: &SearchRequest) -> SiteResult<Vec<TorrentItem>> {
            Ok(Vec::new())
        }

        async fn detail(&self, reference: &TorrentRef) -> SiteResult<TorrentItem> {
            Err(SiteError::NotFound {
                site: "stub".to_string(),
                reference: reference.to_string(),
            })
        }

        async fn user_info(&self) -> SiteResult<UserStats> {
            Ok(UserStats::default())
        }

        async fn download(&self, _id: &str, _hash_token: Option<&str>) -> SiteResult<Vec<u8>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn login_defaults_to_noop() {
        let site = StubSite;
        assert!(site.login().await.is_ok());
    }

    #[tokio::test]
    async fn detail_not_found_carries_reference() {
        let site = StubSite;
        let err = site
            .detail(&TorrentRef::Id("42".to_string()))
            .await
            .expect_err("stub detail should fail");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("42"));
    }
}
