//! TTL cache for search results, keyed by the canonicalised query.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use crate::orchestrator::MultiSearchResult;

/// Default lifetime of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Simple time-bounded cache; expired entries are dropped on access.
pub struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (Instant, MultiSearchResult)>>,
}

impl TtlCache {
    /// Cache with the default TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, (Instant, MultiSearchResult)>> {
        self.entries.lock().unwrap_or_else(|poisoned| {
            warn!("search cache lock poisoned; continuing with recovered guard");
            poisoned.into_inner()
        })
    }

    /// Fetch a live entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<MultiSearchResult> {
        let mut entries = self.lock();
        match entries.get(key) {
            Some((stored, result)) if stored.elapsed() < self.ttl => Some(result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store a result.
    pub fn insert(&self, key: String, result: MultiSearchResult) {
        self.lock().insert(key, (Instant::now(), result));
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including not-yet-reaped expired ones.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_result() -> MultiSearchResult {
        MultiSearchResult {
            items: Vec::new(),
            site_results: std::collections::BTreeMap::new(),
            errors: Vec::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_the_ttl() {
        let cache = TtlCache::with_ttl(Duration::from_secs(60));
        cache.insert("query".to_string(), sample_result());
        assert!(cache.get("query").is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get("query").is_none(), "expired entry is dropped");
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = TtlCache::new();
        cache.insert("a".to_string(), sample_result());
        cache.insert("b".to_string(), sample_result());
        assert_eq!(cache.len(), 2);
        cache.clear();
        assert!(cache.is_empty());
    }
}
