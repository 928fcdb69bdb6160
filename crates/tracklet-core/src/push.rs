//! Handoff seam between the RSS pipeline and the downloader dispatch layer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::model::DownloadSource;

/// Everything dispatch needs to deliver one fetched torrent.
#[derive(Debug, Clone)]
pub struct PushHandoff {
    /// Repository record id of the torrent.
    pub record_id: i64,
    /// Owning site id.
    pub site_id: String,
    /// Site-local torrent id.
    pub torrent_id: String,
    /// Bencoded `.torrent` payload.
    pub bytes: Vec<u8>,
    /// Category forwarded to the downloader.
    pub category: Option<String>,
    /// RSS tag, forwarded to the downloader as a label.
    pub tag: Option<String>,
    /// Sub-path appended below the downloader's default directory.
    pub download_sub_path: Option<String>,
    /// Policy flag copied from the feed.
    pub pause_on_free_end: bool,
    /// Why the torrent was selected.
    pub download_source: DownloadSource,
    /// Rule that matched, when rule-selected.
    pub filter_rule_id: Option<Uuid>,
    /// Site-preferred downloader; the default downloader when `None`.
    pub preferred_downloader: Option<Uuid>,
}

/// Aggregate outcome of one handoff.
#[derive(Debug, Clone)]
pub enum PushOutcome {
    /// At least one downloader accepted (or already had) the torrent.
    Delivered {
        /// Info-hash computed from the payload.
        info_hash: String,
        /// Name of the downloader whose acceptance was recorded.
        downloader: String,
        /// Whether the accepting downloader already had the task.
        already_present: bool,
    },
    /// Every downloader in the push set refused.
    Failed {
        /// Aggregated failure description.
        message: String,
    },
}

/// Dispatch-side contract consumed by the scheduler.
#[async_trait]
pub trait TorrentPusher: Send + Sync {
    /// Deliver one torrent to the configured downloader set. Implementations
    /// record the push (or the failure) against the repository record.
    async fn push(&self, handoff: PushHandoff) -> anyhow::Result<PushOutcome>;
}
