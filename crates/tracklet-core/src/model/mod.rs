//! Data carriers shared across the workspace.
//!
//! # Design
//! - Pure serde types; no IO, no backend specifics.
//! - Identity of a tracked torrent is always `(site_id, torrent_id)`; the
//!   info-hash is a secondary key that only exists once the `.torrent`
//!   payload has been fetched.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Promotion level attached to a torrent, as advertised by the site.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountLevel {
    /// No promotion; all traffic counts.
    #[default]
    #[serde(rename = "none")]
    None,
    /// Download traffic free.
    #[serde(rename = "free")]
    Free,
    /// Download free and upload counted twice.
    #[serde(rename = "2x_free")]
    TwoXFree,
    /// Upload counted twice, download at full cost.
    #[serde(rename = "2x_up")]
    TwoXUp,
    /// Download counted at half.
    #[serde(rename = "50%")]
    HalfDown,
    /// Download at half, upload counted twice.
    #[serde(rename = "2x_50%")]
    TwoXHalfDown,
    /// Download counted at thirty percent.
    #[serde(rename = "30%")]
    ThirtyDown,
}

impl DiscountLevel {
    /// Stable storage string, matching the serde representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Free => "free",
            Self::TwoXFree => "2x_free",
            Self::TwoXUp => "2x_up",
            Self::HalfDown => "50%",
            Self::TwoXHalfDown => "2x_50%",
            Self::ThirtyDown => "30%",
        }
    }

    /// Parse the storage string back; unknown labels collapse to `None`.
    #[must_use]
    pub fn parse(label: &str) -> Self {
        match label {
            "free" => Self::Free,
            "2x_free" => Self::TwoXFree,
            "2x_up" => Self::TwoXUp,
            "50%" => Self::HalfDown,
            "2x_50%" => Self::TwoXHalfDown,
            "30%" => Self::ThirtyDown,
            _ => Self::None,
        }
    }

    /// Whether download traffic is entirely free at this level.
    #[must_use]
    pub const fn is_free(self) -> bool {
        matches!(self, Self::Free | Self::TwoXFree)
    }

    /// The level effectively in force at `now`: a promotion whose end time
    /// has passed is treated as no promotion at all.
    #[must_use]
    pub fn effective(self, end_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        match end_time {
            Some(end) if now > end => Self::None,
            _ => self,
        }
    }
}

/// Canonical torrent listing entry produced by every driver family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TorrentItem {
    /// Site-local torrent identifier.
    pub id: String,
    /// Absolute detail-page URL when known.
    pub url: Option<String>,
    /// Primary title.
    pub title: String,
    /// Secondary title or description line.
    pub subtitle: Option<String>,
    /// Info-hash when the site exposes it ahead of download.
    pub info_hash: Option<String>,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Seeder count.
    pub seeders: u32,
    /// Leecher count.
    pub leechers: u32,
    /// Completed-snatch count.
    pub snatched: u32,
    /// Promotion level currently advertised.
    pub discount: DiscountLevel,
    /// Promotion end when the site reports one.
    pub discount_end_time: Option<DateTime<Utc>>,
    /// Upload timestamp.
    pub uploaded_at: Option<DateTime<Utc>>,
    /// Category label as reported by the site.
    pub category: Option<String>,
    /// Identifier of the site this item came from.
    pub source_site: String,
    /// Whether the torrent carries a Hit-and-Run obligation.
    pub has_hr: bool,
    /// Secondary token some schemata require for the download endpoint.
    pub download_token: Option<String>,
}

/// Account statistics reported by a site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    /// Account display name.
    pub username: Option<String>,
    /// Total uploaded bytes.
    pub uploaded_bytes: u64,
    /// Total downloaded bytes.
    pub downloaded_bytes: u64,
    /// Share ratio as reported (uploaded/downloaded).
    pub ratio: f64,
    /// Bonus-point balance.
    pub bonus: f64,
    /// User class or level label.
    pub level: Option<String>,
    /// Account creation date.
    pub join_date: Option<DateTime<Utc>>,
    /// Last recorded activity.
    pub last_access: Option<DateTime<Utc>>,
    /// Torrents currently seeding.
    pub seeding: u32,
    /// Torrents currently leeching.
    pub leeching: u32,
}

/// Single-site search request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Keyword, matched against titles.
    pub keyword: String,
    /// Optional category constraint.
    pub category: Option<String>,
    /// Only return promotion-free torrents.
    #[serde(default)]
    pub free_only: bool,
    /// Minimum seeder count.
    pub min_seeders: Option<u32>,
    /// Inclusive lower size bound in bytes.
    pub min_size_bytes: Option<u64>,
    /// Inclusive upper size bound in bytes.
    pub max_size_bytes: Option<u64>,
    /// One-based result page.
    pub page: Option<u32>,
    /// Page size where the backend honors one.
    pub page_size: Option<u32>,
    /// Result ordering field.
    pub sort_by: Option<SortField>,
    /// Sort descending when a sort field is supplied.
    #[serde(default)]
    pub order_desc: bool,
    /// Opaque per-site parameters forwarded verbatim to the driver.
    #[serde(default)]
    pub site_params: BTreeMap<String, String>,
}

/// Sortable fields of a [`TorrentItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    /// Upload timestamp.
    UploadedAt,
    /// Payload size.
    SizeBytes,
    /// Seeder count.
    Seeders,
    /// Leecher count.
    Leechers,
    /// Snatch count.
    Snatched,
    /// Title, lexicographic.
    Title,
}

/// How a torrent is referenced when asking a site for detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TorrentRef {
    /// Site-local numeric or string id.
    Id(String),
    /// Absolute detail-page link.
    Link(String),
    /// Feed guid, resolved by the driver (usually identical to the id).
    Guid(String),
}

impl TorrentRef {
    /// The raw referenced value, whichever variant carries it.
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Id(v) | Self::Link(v) | Self::Guid(v) => v,
        }
    }
}

impl fmt::Display for TorrentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/// Why a torrent was selected for download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadSource {
    /// Picked by the default free-window gate.
    FreeDownload,
    /// Picked because a filter rule matched.
    FilterRule,
}

impl DownloadSource {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FreeDownload => "free_download",
            Self::FilterRule => "filter_rule",
        }
    }

    /// Parse the storage string back.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "free_download" => Some(Self::FreeDownload),
            "filter_rule" => Some(Self::FilterRule),
            _ => None,
        }
    }
}

/// Durable record of one sighted torrent, keyed by `(site_id, torrent_id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentRecord {
    /// Row id; zero until persisted.
    pub id: i64,
    /// Owning site id.
    pub site_id: String,
    /// Site-local torrent id (feed dedup key).
    pub torrent_id: String,
    /// Title as first seen.
    pub title: String,
    /// Category label.
    pub category: Option<String>,
    /// RSS tag the sighting came from.
    pub tag: Option<String>,
    /// Payload size in bytes.
    pub size_bytes: u64,
    /// Promotion level at last check.
    pub free_level: DiscountLevel,
    /// Promotion end when known.
    pub free_end_time: Option<DateTime<Utc>>,
    /// Info-hash once the `.torrent` payload has been fetched.
    pub torrent_hash: Option<String>,
    /// Whether the `.torrent` payload has been fetched.
    pub is_downloaded: bool,
    /// Push outcome: `None` until attempted, then success/failure.
    pub is_pushed: Option<bool>,
    /// When the successful push happened.
    pub push_time: Option<DateTime<Utc>>,
    /// Downloader that accepted the push.
    pub downloader_id: Option<Uuid>,
    /// Downloader display name at push time.
    pub downloader_name: Option<String>,
    /// Task id assigned by the downloader.
    pub downloader_task_id: Option<String>,
    /// Last observed transfer progress, 0–100.
    pub progress: f64,
    /// Whether the transfer finished.
    pub is_completed: bool,
    /// Completion timestamp.
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether the lifecycle controller paused the task.
    pub is_paused_by_system: bool,
    /// When the system pause happened.
    pub paused_at: Option<DateTime<Utc>>,
    /// Why the task was paused or deleted.
    pub pause_reason: Option<String>,
    /// Policy flag copied from the feed at push time.
    pub pause_on_free_end: bool,
    /// Whether the eligibility gate rejected this torrent.
    pub is_skipped: bool,
    /// Last reconciliation probe against the downloader.
    pub last_check_time: Option<DateTime<Utc>>,
    /// Transient-failure count.
    pub retry_count: u32,
    /// Last error message recorded against this record.
    pub last_error: Option<String>,
    /// Why the torrent was selected.
    pub download_source: Option<DownloadSource>,
    /// Rule that matched, when selected through the rule gate.
    pub filter_rule_id: Option<Uuid>,
    /// Creation timestamp; preserved across upserts.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl TorrentRecord {
    /// Fresh unpersisted record for a first sighting.
    #[must_use]
    pub fn new(site_id: &str, torrent_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            site_id: site_id.to_string(),
            torrent_id: torrent_id.to_string(),
            title: String::new(),
            category: None,
            tag: None,
            size_bytes: 0,
            free_level: DiscountLevel::None,
            free_end_time: None,
            torrent_hash: None,
            is_downloaded: false,
            is_pushed: None,
            push_time: None,
            downloader_id: None,
            downloader_name: None,
            downloader_task_id: None,
            progress: 0.0,
            is_completed: false,
            completed_at: None,
            is_paused_by_system: false,
            paused_at: None,
            pause_reason: None,
            pause_on_free_end: false,
            is_skipped: false,
            last_check_time: None,
            retry_count: 0,
            last_error: None,
            download_source: None,
            filter_rule_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Promotion level effectively in force at `now`.
    #[must_use]
    pub fn effective_free_level(&self, now: DateTime<Utc>) -> DiscountLevel {
        self.free_level.effective(self.free_end_time, now)
    }
}

/// User-configured RSS subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RssFeed {
    /// Subscription id.
    pub id: Uuid,
    /// Site the feed belongs to.
    pub site_id: String,
    /// Display name, unique per site.
    pub name: String,
    /// Feed URL, usually carrying the passkey.
    pub url: String,
    /// Tag used to partition the staging directory.
    pub tag: Option<String>,
    /// Category constraint applied to items.
    pub category: Option<String>,
    /// Poll interval in minutes; zero means "use the global default".
    pub interval_minutes: u32,
    /// Sub-path appended to the downloader save path.
    pub download_sub_path: Option<String>,
    /// Whether the scheduler runs this feed.
    pub enabled: bool,
    /// Copy of the pause-at-free-end policy applied to pushes.
    pub pause_on_free_end: bool,
    /// Attached filter rules, in attachment order.
    #[serde(default)]
    pub filter_rule_ids: Vec<Uuid>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Floor applied to every poll interval.
pub const MIN_FEED_INTERVAL_MINUTES: u32 = 5;

impl RssFeed {
    /// Effective poll interval given the global default, floored at
    /// [`MIN_FEED_INTERVAL_MINUTES`].
    #[must_use]
    pub fn effective_interval(&self, global_default_minutes: u32) -> Duration {
        let minutes = if self.interval_minutes == 0 {
            global_default_minutes
        } else {
            self.interval_minutes
        };
        Duration::from_secs(u64::from(minutes.max(MIN_FEED_INTERVAL_MINUTES)) * 60)
    }
}

/// How a filter-rule pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Case-insensitive substring.
    Keyword,
    /// `*`/`?` glob, compiled to an anchored regex.
    Wildcard,
    /// Raw regular expression.
    Regex,
}

impl PatternType {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Keyword => "keyword",
            Self::Wildcard => "wildcard",
            Self::Regex => "regex",
        }
    }

    /// Parse the storage string back.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "keyword" => Some(Self::Keyword),
            "wildcard" => Some(Self::Wildcard),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// Which item fields a rule is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    /// Title only.
    Title,
    /// Tag only.
    Tag,
    /// Either title or tag.
    Both,
}

impl MatchField {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Title => "title",
            Self::Tag => "tag",
            Self::Both => "both",
        }
    }

    /// Parse the storage string back.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "title" => Some(Self::Title),
            "tag" => Some(Self::Tag),
            "both" => Some(Self::Both),
            _ => None,
        }
    }
}

/// Maximum accepted pattern length.
pub const MAX_PATTERN_LEN: usize = 512;

/// User-configured selection rule evaluated by the eligibility engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    /// Rule id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Pattern text, interpretation depends on `pattern_type`.
    pub pattern: String,
    /// Pattern interpretation.
    pub pattern_type: PatternType,
    /// Fields the pattern is applied to.
    pub match_field: MatchField,
    /// Whether a match additionally requires the free gate to pass.
    pub require_free: bool,
    /// Evaluation priority; higher runs first.
    pub priority: i32,
    /// Whether the rule participates in evaluation.
    pub enabled: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp; part of the compiled-matcher cache key.
    pub updated_at: DateTime<Utc>,
}

/// Supported downloader backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloaderKind {
    /// qBittorrent Web API v2.
    Qbittorrent,
    /// Transmission RPC.
    Transmission,
}

impl DownloaderKind {
    /// Stable storage string.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Qbittorrent => "qbittorrent",
            Self::Transmission => "transmission",
        }
    }

    /// Parse the storage string back.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "qbittorrent" => Some(Self::Qbittorrent),
            "transmission" => Some(Self::Transmission),
            _ => None,
        }
    }
}

/// User-configured downloader endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderSetting {
    /// Downloader id.
    pub id: Uuid,
    /// Unique display name.
    pub name: String,
    /// Backend protocol.
    pub kind: DownloaderKind,
    /// Base URL of the daemon.
    pub url: String,
    /// Login user where the daemon requires one.
    pub username: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// Whether this is the default push target.
    pub is_default: bool,
    /// Whether pushes may use this downloader.
    pub enabled: bool,
    /// Whether pushed torrents start immediately.
    pub auto_start: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Save-path preset attached to a downloader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderDirectory {
    /// Directory id.
    pub id: Uuid,
    /// Owning downloader.
    pub downloader_id: Uuid,
    /// Absolute path on the downloader host.
    pub path: String,
    /// Optional display alias.
    pub alias: Option<String>,
    /// Whether this path is used when a push names no save path.
    pub is_default: bool,
}

/// Authentication factor a site definition expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Long-lived browser cookie.
    Cookie,
    /// API key header or parameter.
    ApiKey,
    /// Passkey embedded in URLs.
    Passkey,
    /// Cookie plus API key, both required.
    CookieAndApiKey,
}

impl AuthMethod {
    /// Credential fields a configuration must populate for this method.
    #[must_use]
    pub const fn required_fields(self) -> &'static [&'static str] {
        match self {
            Self::Cookie => &["cookie"],
            Self::ApiKey => &["api_key"],
            Self::Passkey => &["passkey"],
            Self::CookieAndApiKey => &["cookie", "api_key"],
        }
    }
}

/// User-supplied per-site configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Definition id this configuration belongs to.
    pub site_id: String,
    /// Whether the site participates in scheduling, search and sync.
    pub enabled: bool,
    /// Browser cookie for cookie-authenticated sites.
    pub cookie: Option<String>,
    /// API key for token-authenticated sites.
    pub api_key: Option<String>,
    /// Passkey for URL-embedded authentication.
    pub passkey: Option<String>,
    /// Override of the definition's requests-per-second limit.
    pub rate_limit: Option<f64>,
    /// Override of the definition's burst capacity.
    pub rate_burst: Option<u32>,
    /// Override of the coarse window length in seconds.
    pub rate_window_secs: Option<u64>,
    /// Override of the coarse window request cap.
    pub rate_window_limit: Option<u32>,
    /// Preferred downloader for pushes originating from this site.
    pub downloader_id: Option<Uuid>,
}

/// Upload request handed to a downloader client.
#[derive(Debug, Clone)]
pub struct AddTorrentRequest {
    /// Bencoded `.torrent` payload.
    pub bytes: Vec<u8>,
    /// Info-hash of the payload, lowercase hex.
    pub info_hash: String,
    /// Save path; the downloader's default directory when `None`.
    pub save_path: Option<String>,
    /// Category forwarded to the downloader.
    pub category: Option<String>,
    /// Tags forwarded to the downloader.
    pub tags: Vec<String>,
    /// Whether to add in the paused state.
    pub paused: bool,
}

/// Task handle returned by a downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTask {
    /// Backend-assigned task identifier.
    pub task_id: String,
    /// Display name when the backend reports one.
    pub name: Option<String>,
}

/// Progress snapshot of a downloader task.
#[derive(Debug, Clone, Default)]
pub struct TaskProgress {
    /// Completion percentage, 0–100.
    pub percent: f64,
    /// Whether the transfer finished.
    pub completed: bool,
    /// Backend-specific state label.
    pub state: Option<String>,
}
