//! Multi-site search fan-out.
//!
//! One call per enabled target site, bounded by the query timeout;
//! per-site failures are collected, never propagated. Sites over-report
//! promotion and bound filters often enough that the merge re-applies them
//! in-process.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::debug;
use tracklet_core::{SearchRequest, SiteProvider, SortField, TorrentItem};

use crate::cache::TtlCache;

/// Default per-site search timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A cross-site search query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiSearchQuery {
    /// Keyword, matched against titles.
    pub keyword: String,
    /// Optional category constraint.
    pub category: Option<String>,
    /// Only promotion-free torrents.
    #[serde(default)]
    pub free_only: bool,
    /// Minimum seeder count.
    pub min_seeders: Option<u32>,
    /// Inclusive lower size bound in bytes.
    pub min_size_bytes: Option<u64>,
    /// Inclusive upper size bound in bytes.
    pub max_size_bytes: Option<u64>,
    /// One-based result page forwarded to each site.
    pub page: Option<u32>,
    /// Page size forwarded to each site.
    pub page_size: Option<u32>,
    /// Target sites; every enabled site when empty.
    #[serde(default)]
    pub sites: Vec<String>,
    /// Per-site timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Post-merge sort field; site order is preserved when absent.
    pub sort_by: Option<SortField>,
    /// Sort descending.
    #[serde(default)]
    pub order_desc: bool,
    /// Opaque per-site parameters.
    #[serde(default)]
    pub site_params: std::collections::BTreeMap<String, String>,
}

impl MultiSearchQuery {
    /// Stable cache key covering every field that affects the result.
    #[must_use]
    pub fn canonical_key(&self) -> String {
        let mut sites = self.sites.clone();
        sites.sort();
        let params: Vec<String> = self
            .site_params
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        format!(
            "kw={}|cat={}|free={}|seed={}|min={}|max={}|page={}|per={}|sites={}|sort={:?}|desc={}|params={}",
            self.keyword.to_lowercase(),
            self.category.as_deref().unwrap_or(""),
            self.free_only,
            self.min_seeders.unwrap_or(0),
            self.min_size_bytes.unwrap_or(0),
            self.max_size_bytes.unwrap_or(0),
            self.page.unwrap_or(1),
            self.page_size.unwrap_or(0),
            sites.join(","),
            self.sort_by,
            self.order_desc,
            params.join(","),
        )
    }

    fn to_request(&self) -> SearchRequest {
        SearchRequest {
            keyword: self.keyword.clone(),
            category: self.category.clone(),
            free_only: self.free_only,
            min_seeders: self.min_seeders,
            min_size_bytes: self.min_size_bytes,
            max_size_bytes: self.max_size_bytes,
            page: self.page,
            page_size: self.page_size,
            sort_by: self.sort_by,
            order_desc: self.order_desc,
            site_params: self.site_params.clone(),
        }
    }

    fn timeout(&self) -> Duration {
        self.timeout_secs
            .filter(|secs| *secs > 0)
            .map_or(DEFAULT_TIMEOUT, Duration::from_secs)
    }
}

/// One site's failure inside an aggregate result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteFailure {
    /// Failing site id.
    pub site: String,
    /// Failure description.
    pub error: String,
}

/// Aggregate search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiSearchResult {
    /// Merged items, site order preserved unless a sort was requested.
    pub items: Vec<TorrentItem>,
    /// Per-site item counts (after the in-process re-filter).
    pub site_results: BTreeMap<String, usize>,
    /// Per-site failures.
    pub errors: Vec<SiteFailure>,
}

/// Cross-site search front end.
pub struct SearchOrchestrator {
    sites: Arc<dyn SiteProvider>,
    cache: TtlCache,
}

impl SearchOrchestrator {
    /// Orchestrator with the default cache TTL.
    #[must_use]
    pub fn new(sites: Arc<dyn SiteProvider>) -> Self {
        Self {
            sites,
            cache: TtlCache::new(),
        }
    }

    /// Orchestrator with an explicit cache TTL.
    #[must_use]
    pub fn with_cache_ttl(sites: Arc<dyn SiteProvider>, ttl: Duration) -> Self {
        Self {
            sites,
            cache: TtlCache::with_ttl(ttl),
        }
    }

    /// Run a query, consulting the cache first.
    pub async fn search(&self, query: &MultiSearchQuery) -> MultiSearchResult {
        let key = query.canonical_key();
        if let Some(cached) = self.cache.get(&key) {
            debug!(key = %key, "search cache hit");
            return cached;
        }

        let result = self.fan_out(query).await;
        self.cache.insert(key, result.clone());
        result
    }

    /// Drop every cached result.
    pub fn cache_clear(&self) {
        self.cache.clear();
    }

    /// Number of cached results.
    #[must_use]
    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }

    async fn fan_out(&self, query: &MultiSearchQuery) -> MultiSearchResult {
        let enabled = self.sites.enabled();
        let targets: Vec<_> = if query.sites.is_empty() {
            enabled
        } else {
            enabled
                .into_iter()
                .filter(|site| query.sites.iter().any(|wanted| wanted == site.id()))
                .collect()
        };

        let timeout = query.timeout();
        let request = Arc::new(query.to_request());
        let mut tasks = JoinSet::new();
        for site in targets {
            let request = Arc::clone(&request);
            tasks.spawn(async move {
                let site_id = site.id().to_string();
                let outcome =
                    tokio::time::timeout(timeout, site.search(&request)).await;
                match outcome {
                    Ok(Ok(items)) => (site_id, Ok(items)),
                    Ok(Err(error)) => (site_id, Err(error.to_string())),
                    Err(_) => (site_id, Err("search timed out".to_string())),
                }
            });
        }

        let mut per_site: BTreeMap<String, Vec<TorrentItem>> = BTreeMap::new();
        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((site_id, Ok(items))) => {
                    per_site.insert(site_id, items);
                }
                Ok((site_id, Err(error))) => {
                    errors.push(SiteFailure {
                        site: site_id,
                        error,
                    });
                }
                Err(error) => errors.push(SiteFailure {
                    site: "unknown".to_string(),
                    error: format!("search task panicked: {error}"),
                }),
            }
        }

        let now = Utc::now();
        let mut site_results = BTreeMap::new();
        let mut items = Vec::new();
        for (site_id, mut site_items) in per_site {
            site_items.retain(|item| keep_item(item, query, now));
            site_results.insert(site_id, site_items.len());
            items.extend(site_items);
        }

        if let Some(field) = query.sort_by {
            items.sort_by(|a, b| {
                let ordering = compare_items(a, b, field);
                if query.order_desc {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        MultiSearchResult {
            items,
            site_results,
            errors,
        }
    }
}

fn keep_item(item: &TorrentItem, query: &MultiSearchQuery, now: chrono::DateTime<Utc>) -> bool {
    if query.free_only && !item.discount.effective(item.discount_end_time, now).is_free() {
        return false;
    }
    if query.min_seeders.is_some_and(|min| item.seeders < min) {
        return false;
    }
    if query.min_size_bytes.is_some_and(|min| item.size_bytes < min) {
        return false;
    }
    if query.max_size_bytes.is_some_and(|max| item.size_bytes > max) {
        return false;
    }
    true
}

fn compare_items(a: &TorrentItem, b: &TorrentItem, field: SortField) -> Ordering {
    match field {
        SortField::UploadedAt => a.uploaded_at.cmp(&b.uploaded_at),
        SortField::SizeBytes => a.size_bytes.cmp(&b.size_bytes),
        SortField::Seeders => a.seeders.cmp(&b.seeders),
        SortField::Leechers => a.leechers.cmp(&b.leechers),
        SortField::Snatched => a.snatched.cmp(&b.snatched),
        SortField::Title => a.title.cmp(&b.title),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_keys_ignore_site_order_and_case() {
        let mut a = MultiSearchQuery {
            keyword: "Test".to_string(),
            sites: vec!["hdsky".to_string(), "mteam".to_string()],
            ..MultiSearchQuery::default()
        };
        let b = MultiSearchQuery {
            keyword: "test".to_string(),
            sites: vec!["mteam".to_string(), "hdsky".to_string()],
            ..MultiSearchQuery::default()
        };
        assert_eq!(a.canonical_key(), b.canonical_key());

        a.free_only = true;
        assert_ne!(a.canonical_key(), b.canonical_key());
    }

    #[test]
    fn sort_is_stable_per_field() {
        let item = |title: &str, seeders: u32| TorrentItem {
            title: title.to_string(),
            seeders,
            ..TorrentItem::default()
        };
        let mut items = vec![item("b", 5), item("a", 9), item("c", 5)];
        items.sort_by(|a, b| compare_items(a, b, SortField::Seeders).reverse());
        assert_eq!(items[0].title, "a");
        assert_eq!(items[1].title, "b", "equal keys keep their order");
        assert_eq!(items[2].title, "c");
    }
}
