//! Immutable site definitions: the compile-time catalog entry for one
//! tracker, consumed by the registry and the driver families.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracklet_core::{AuthMethod, DiscountLevel, Site};

use crate::http::SiteContext;

/// Driver family selector. The set is closed; every schema resolves to one
/// of the four protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteSchema {
    /// Classic NexusPHP HTML, driven by CSS selectors.
    NexusPhp,
    /// M-Team style token JSON API.
    MTorrent,
    /// Gazelle `ajax.php` JSON.
    Gazelle,
    /// UNIT3D `/api/torrents` JSON.
    Unit3d,
    /// HDDolby: NexusPHP layout with its own selector overrides.
    HdDolby,
    /// Rousi: UNIT3D-compatible JSON API.
    Rousi,
}

impl SiteSchema {
    /// The protocol family whose driver implements this schema.
    #[must_use]
    pub const fn family(self) -> Self {
        match self {
            Self::NexusPhp | Self::HdDolby => Self::NexusPhp,
            Self::MTorrent => Self::MTorrent,
            Self::Gazelle => Self::Gazelle,
            Self::Unit3d | Self::Rousi => Self::Unit3d,
        }
    }

    /// Stable label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NexusPhp => "nexusphp",
            Self::MTorrent => "mtorrent",
            Self::Gazelle => "gazelle",
            Self::Unit3d => "unit3d",
            Self::HdDolby => "hddolby",
            Self::Rousi => "rousi",
        }
    }
}

/// Constructor turning a prepared [`SiteContext`] into a live driver.
pub type DriverFactory = fn(SiteContext) -> Arc<dyn Site>;

/// Rate limiting parameters of a site.
#[derive(Debug, Clone, PartialEq)]
pub struct RateParams {
    /// Sustained requests per second refilled into the token bucket.
    pub per_second: f64,
    /// Token bucket capacity.
    pub burst: u32,
    /// Optional coarse window length (commonly one hour).
    pub window: Option<Duration>,
    /// Request cap inside the coarse window.
    pub window_limit: Option<u32>,
}

impl Default for RateParams {
    fn default() -> Self {
        Self {
            per_second: 2.0,
            burst: 5,
            window: None,
            window_limit: None,
        }
    }
}

/// Request paths of a site, relative to a base URL. `{}` is replaced by the
/// driver with the query or id.
#[derive(Debug, Clone, Default)]
pub struct Endpoints {
    /// Search page or API endpoint.
    pub search: String,
    /// Detail page or API endpoint.
    pub detail: String,
    /// Download endpoint for `.torrent` payloads.
    pub download: String,
    /// Account statistics endpoint.
    pub user_info: String,
}

/// One extraction rule: a CSS selector, an optional attribute, and a filter
/// pipeline applied to the raw value.
#[derive(Debug, Clone, Default)]
pub struct SelectorRule {
    /// CSS selector evaluated against the current scope.
    pub selector: String,
    /// Attribute to read; element text when `None`.
    pub attr: Option<String>,
    /// Transform pipeline applied to the extracted value.
    pub filters: Vec<crate::parse::FilterStep>,
}

impl SelectorRule {
    /// Rule reading an element's text content.
    #[must_use]
    pub fn text(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: None,
            filters: Vec::new(),
        }
    }

    /// Rule reading an attribute value.
    #[must_use]
    pub fn attr(selector: &str, attr: &str) -> Self {
        Self {
            selector: selector.to_string(),
            attr: Some(attr.to_string()),
            filters: Vec::new(),
        }
    }

    /// Append a filter step.
    #[must_use]
    pub fn with(mut self, step: crate::parse::FilterStep) -> Self {
        self.filters.push(step);
        self
    }
}

/// Schema-specific parse hints for the HTML families.
#[derive(Debug, Clone, Default)]
pub struct Selectors {
    /// Selector matching one result row on the search page.
    pub rows: String,
    /// Field extraction rules, keyed by canonical field name (`title`,
    /// `link`, `size`, `seeders`, `leechers`, `snatched`, `category`,
    /// `uploaded_at`, `subtitle`).
    pub fields: HashMap<String, SelectorRule>,
    /// Promotion CSS class → discount overrides merged over the defaults.
    pub promotion_classes: HashMap<String, DiscountLevel>,
    /// Selector marking a Hit-and-Run torrent on the detail page.
    pub hr_marker: Option<String>,
    /// Field rules applied to the detail page, same keys as `fields`.
    pub detail_fields: HashMap<String, SelectorRule>,
    /// Field rules applied to the user-details page (`uploaded`,
    /// `downloaded`, `ratio`, `bonus`, `level`, `join_date`, `seeding`).
    pub user_fields: HashMap<String, SelectorRule>,
}

/// Minimum account class required for site features; registry reference
/// data surfaced through the read API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LevelRequirement {
    /// Class name as displayed by the site.
    pub level: String,
    /// Minimum uploaded bytes.
    pub uploaded_bytes: u64,
    /// Minimum ratio.
    pub ratio: f64,
    /// Weeks of membership required.
    pub weeks: u32,
}

/// Immutable catalog entry for one tracker.
#[derive(Clone)]
pub struct SiteDefinition {
    /// Stable identifier, e.g. `"hdsky"`.
    pub id: &'static str,
    /// Driver family selector.
    pub schema: SiteSchema,
    /// Human-readable name.
    pub display_name: &'static str,
    /// Base URLs in failover order; at least one.
    pub base_urls: Vec<String>,
    /// Retired URLs kept for normalisation-collision checks.
    pub legacy_urls: Vec<String>,
    /// Authentication factor the site expects.
    pub auth_method: AuthMethod,
    /// Rate limiting defaults, overridable per user config.
    pub rate: RateParams,
    /// UTC offset in hours for site-local timestamps (`+8` unless declared).
    pub timezone_offset_hours: i8,
    /// Request paths.
    pub endpoints: Endpoints,
    /// Parse hints for the HTML families.
    pub selectors: Selectors,
    /// Account class reference data.
    pub level_requirements: Vec<LevelRequirement>,
    /// Marks a site that is temporarily not constructible.
    pub unavailable: bool,
    /// Definition-specific driver constructor, overriding the schema lookup.
    pub create_driver: Option<DriverFactory>,
}

impl std::fmt::Debug for SiteDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteDefinition")
            .field("id", &self.id)
            .field("schema", &self.schema)
            .field("base_urls", &self.base_urls)
            .field("auth_method", &self.auth_method)
            .field("unavailable", &self.unavailable)
            .finish_non_exhaustive()
    }
}

impl SiteDefinition {
    /// Skeleton definition with library defaults; builders in
    /// [`crate::builtin`] fill in the rest.
    #[must_use]
    pub fn new(id: &'static str, schema: SiteSchema, display_name: &'static str) -> Self {
        Self {
            id,
            schema,
            display_name,
            base_urls: Vec::new(),
            legacy_urls: Vec::new(),
            auth_method: AuthMethod::Cookie,
            rate: RateParams::default(),
            timezone_offset_hours: 8,
            endpoints: Endpoints::default(),
            selectors: Selectors::default(),
            level_requirements: Vec::new(),
            unavailable: false,
            create_driver: None,
        }
    }
}

/// Normalise a URL for duplicate detection: scheme + lowercased host + path
/// without a trailing slash.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    let trimmed = url.trim();
    let (scheme, rest) = trimmed
        .split_once("://")
        .map_or(("https", trimmed), |(s, r)| (s, r));
    let (host, path) = rest.split_once('/').map_or((rest, ""), |(h, p)| (h, p));
    let path = path.trim_end_matches('/');
    if path.is_empty() {
        format!("{}://{}", scheme.to_ascii_lowercase(), host.to_ascii_lowercase())
    } else {
        format!(
            "{}://{}/{}",
            scheme.to_ascii_lowercase(),
            host.to_ascii_lowercase(),
            path
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_families_collapse_variants() {
        assert_eq!(SiteSchema::HdDolby.family(), SiteSchema::NexusPhp);
        assert_eq!(SiteSchema::Rousi.family(), SiteSchema::Unit3d);
        assert_eq!(SiteSchema::Gazelle.family(), SiteSchema::Gazelle);
    }

    #[test]
    fn url_normalisation_strips_noise() {
        assert_eq!(
            normalize_url("HTTPS://HDSky.me/"),
            "https://hdsky.me"
        );
        assert_eq!(
            normalize_url("https://hdsky.me/torrents/"),
            "https://hdsky.me/torrents"
        );
        assert_eq!(
            normalize_url("hdsky.me"),
            "https://hdsky.me"
        );
    }

    #[test]
    fn default_rate_params_match_catalog_defaults() {
        let rate = RateParams::default();
        assert!((rate.per_second - 2.0).abs() < f64::EPSILON);
        assert_eq!(rate.burst, 5);
        assert!(rate.window.is_none());
    }
}
