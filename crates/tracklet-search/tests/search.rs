//! Fan-out search tests over stub sites.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracklet_core::{DiscountLevel, Site, SiteProvider, SortField, TorrentItem};
use tracklet_search::{MultiSearchQuery, SearchOrchestrator};
use tracklet_test_support::StubSite;

struct MapProvider {
    sites: Vec<Arc<StubSite>>,
}

impl SiteProvider for MapProvider {
    fn get(&self, site_id: &str) -> Option<Arc<dyn Site>> {
        self.sites
            .iter()
            .find(|site| site.site_id == site_id)
            .map(|site| Arc::clone(site) as Arc<dyn Site>)
    }

    fn enabled(&self) -> Vec<Arc<dyn Site>> {
        self.sites
            .iter()
            .map(|site| Arc::clone(site) as Arc<dyn Site>)
            .collect()
    }
}

fn item(site: &str, title: &str, seeders: u32, free: bool) -> TorrentItem {
    TorrentItem {
        id: title.to_string(),
        title: title.to_string(),
        seeders,
        size_bytes: 1024,
        discount: if free {
            DiscountLevel::Free
        } else {
            DiscountLevel::None
        },
        discount_end_time: free.then(|| Utc::now() + Duration::hours(4)),
        source_site: site.to_string(),
        ..TorrentItem::default()
    }
}

#[tokio::test]
async fn fan_out_merges_and_collects_errors() {
    let hdsky = Arc::new(StubSite::new("hdsky"));
    *hdsky.search_results.lock().expect("lock") = vec![
        item("hdsky", "Movie.A", 10, true),
        item("hdsky", "Movie.B", 5, false),
    ];
    let broken = Arc::new(StubSite::new("mteam"));
    *broken.fail_with.lock().expect("lock") = Some("api down".to_string());

    let orchestrator = SearchOrchestrator::new(Arc::new(MapProvider {
        sites: vec![hdsky, broken],
    }));
    let result = orchestrator
        .search(&MultiSearchQuery {
            keyword: "Movie".to_string(),
            ..MultiSearchQuery::default()
        })
        .await;

    assert_eq!(result.items.len(), 2);
    assert_eq!(result.site_results["hdsky"], 2);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].site, "mteam");
}

#[tokio::test]
async fn free_only_is_reapplied_after_the_merge() {
    let site = Arc::new(StubSite::new("hdsky"));
    *site.search_results.lock().expect("lock") = vec![
        item("hdsky", "Free.Movie", 10, true),
        item("hdsky", "Paid.Movie", 10, false),
    ];

    let orchestrator = SearchOrchestrator::new(Arc::new(MapProvider { sites: vec![site] }));
    let result = orchestrator
        .search(&MultiSearchQuery {
            keyword: "Movie".to_string(),
            free_only: true,
            ..MultiSearchQuery::default()
        })
        .await;

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].title, "Free.Movie");
}

#[tokio::test]
async fn sort_by_orders_across_sites() {
    let a = Arc::new(StubSite::new("hdsky"));
    *a.search_results.lock().expect("lock") = vec![item("hdsky", "A", 3, true)];
    let b = Arc::new(StubSite::new("mteam"));
    *b.search_results.lock().expect("lock") = vec![item("mteam", "B", 9, true)];

    let orchestrator = SearchOrchestrator::new(Arc::new(MapProvider { sites: vec![a, b] }));
    let result = orchestrator
        .search(&MultiSearchQuery {
            keyword: "x".to_string(),
            sort_by: Some(SortField::Seeders),
            order_desc: true,
            ..MultiSearchQuery::default()
        })
        .await;

    assert_eq!(result.items[0].seeders, 9);
    assert_eq!(result.items[1].seeders, 3);
}

#[tokio::test]
async fn cache_returns_the_first_answer_until_cleared() {
    let site = Arc::new(StubSite::new("hdsky"));
    *site.search_results.lock().expect("lock") = vec![item("hdsky", "One", 1, true)];

    let orchestrator = SearchOrchestrator::new(Arc::new(MapProvider {
        sites: vec![Arc::clone(&site)],
    }));
    let query = MultiSearchQuery {
        keyword: "one".to_string(),
        ..MultiSearchQuery::default()
    };

    let first = orchestrator.search(&query).await;
    assert_eq!(first.items.len(), 1);
    assert_eq!(orchestrator.cache_size(), 1);

    // The site now answers differently; the cache keeps the old result.
    *site.search_results.lock().expect("lock") = Vec::new();
    let second = orchestrator.search(&query).await;
    assert_eq!(second.items.len(), 1);

    orchestrator.cache_clear();
    let third = orchestrator.search(&query).await;
    assert!(third.items.is_empty());
}

#[tokio::test]
async fn explicit_site_list_intersects_with_enabled_sites() {
    let a = Arc::new(StubSite::new("hdsky"));
    *a.search_results.lock().expect("lock") = vec![item("hdsky", "A", 1, true)];
    let b = Arc::new(StubSite::new("mteam"));
    *b.search_results.lock().expect("lock") = vec![item("mteam", "B", 1, true)];

    let orchestrator = SearchOrchestrator::new(Arc::new(MapProvider { sites: vec![a, b] }));
    let result = orchestrator
        .search(&MultiSearchQuery {
            keyword: "x".to_string(),
            sites: vec!["mteam".to_string(), "nonexistent".to_string()],
            ..MultiSearchQuery::default()
        })
        .await;

    assert_eq!(result.items.len(), 1);
    assert_eq!(result.items[0].source_site, "mteam");
    assert!(!result.site_results.contains_key("hdsky"));
}
