//! Integration tests for the SQLite store, run against in-memory databases.

use chrono::{Duration, TimeZone, Utc};
use tracklet_core::{
    DiscountLevel, DownloadSource, DownloaderDirectory, DownloaderKind, DownloaderSetting,
    FilterRule, MatchField, PatternType, RateLimitJournal, RssFeed, TorrentRecord, UserStats,
};
use tracklet_data::torrents::PushStamp;
use tracklet_data::{DataError, Store, TorrentListFilter, TorrentSort};
use uuid::Uuid;

async fn store() -> Store {
    Store::connect("sqlite::memory:").await.expect("store opens")
}

fn sample_record(site: &str, torrent: &str) -> TorrentRecord {
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();
    let mut record = TorrentRecord::new(site, torrent, now);
    record.title = "Test.Movie.2025.2160p.WEB-DL".to_string();
    record.tag = Some("movies".to_string());
    record.size_bytes = 42 * 1024 * 1024 * 1024;
    record.free_level = DiscountLevel::Free;
    record.free_end_time = Some(now + Duration::days(3));
    record
}

#[tokio::test]
async fn upsert_is_idempotent_per_natural_key() {
    let store = store().await;
    let record = sample_record("hdsky", "164895");

    let first_id = store.upsert_torrent(&record).await.expect("insert");

    let mut changed = record.clone();
    changed.title = "Test.Movie.2025.1080p".to_string();
    changed.updated_at = record.updated_at + Duration::minutes(5);
    let second_id = store.upsert_torrent(&changed).await.expect("update");

    assert_eq!(first_id, second_id, "same key must hit the same row");

    let page = store
        .list_torrents(&TorrentListFilter::default(), 1, 50, TorrentSort::default())
        .await
        .expect("list");
    assert_eq!(page.total, 1);
    assert_eq!(page.records[0].title, "Test.Movie.2025.1080p");
    assert_eq!(
        page.records[0].created_at, record.created_at,
        "created_at survives upserts"
    );

    let other = store
        .upsert_torrent(&sample_record("hdsky", "164896"))
        .await
        .expect("second key");
    assert_ne!(first_id, other);
}

#[tokio::test]
async fn push_stamp_lands_atomically() {
    let store = store().await;
    let id = store
        .upsert_torrent(&sample_record("hdsky", "164895"))
        .await
        .expect("insert");

    let downloader_id = Uuid::new_v4();
    let push_time = Utc::now();
    store
        .record_torrent_push(
            id,
            &PushStamp {
                torrent_hash: "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3".to_string(),
                downloader_id,
                downloader_name: "qb-main".to_string(),
                downloader_task_id: "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3".to_string(),
                push_time,
                pause_on_free_end: true,
                download_source: DownloadSource::FreeDownload,
                filter_rule_id: None,
            },
        )
        .await
        .expect("push stamp");

    let record = store
        .get_torrent("hdsky", "164895")
        .await
        .expect("get")
        .expect("present");
    assert_eq!(record.is_pushed, Some(true));
    assert_eq!(record.downloader_id, Some(downloader_id));
    assert!(record.torrent_hash.is_some());
    assert!(record.pause_on_free_end);
    assert!(record.last_error.is_none());

    let by_hash = store
        .get_torrent_by_hash("hdsky", "a94a8fe5ccb19ba61c4c0873d391e987982fbbd3")
        .await
        .expect("hash lookup")
        .expect("present");
    assert_eq!(by_hash.id, record.id);
}

#[tokio::test]
async fn completion_clears_system_pause() {
    let store = store().await;
    let id = store
        .upsert_torrent(&sample_record("hdsky", "1"))
        .await
        .expect("insert");
    let now = Utc::now();

    store
        .mark_torrent_system_paused(id, "free window expired", 40.0, now)
        .await
        .expect("pause");
    store
        .mark_torrent_completed(id, now)
        .await
        .expect("complete");

    let record = store
        .get_torrent_by_id(id)
        .await
        .expect("get")
        .expect("present");
    assert!(record.is_completed);
    assert!(
        !record.is_paused_by_system,
        "completed and system-paused must never coexist"
    );
}

#[tokio::test]
async fn archive_moves_terminal_rows_losslessly() {
    let store = store().await;
    let now = Utc::now();

    // Terminal: pushed, window long past, created outside retention.
    let mut terminal = sample_record("hdsky", "old");
    terminal.created_at = now - Duration::days(90);
    terminal.updated_at = terminal.created_at;
    terminal.free_end_time = Some(now - Duration::days(80));
    terminal.is_pushed = Some(true);
    terminal.torrent_hash = Some("feedfacefeedfacefeedfacefeedfacefeedface".to_string());
    let terminal_id = store.upsert_torrent(&terminal).await.expect("terminal");

    // Not terminal: still inside its free window.
    let mut live = sample_record("hdsky", "fresh");
    live.is_pushed = Some(true);
    live.free_end_time = Some(now + Duration::days(1));
    store.upsert_torrent(&live).await.expect("live");

    let before = store
        .get_torrent_by_id(terminal_id)
        .await
        .expect("get")
        .expect("present");

    let archived = store
        .archive_torrents(Duration::days(30), 3, now)
        .await
        .expect("archive");
    assert_eq!(archived, 1);

    assert!(
        store
            .get_torrent("hdsky", "old")
            .await
            .expect("get")
            .is_none()
    );
    assert!(
        store
            .get_torrent("hdsky", "fresh")
            .await
            .expect("get")
            .is_some()
    );

    let row: (String, String, i64, String) = sqlx::query_as(
        "SELECT site_id, torrent_id, size_bytes, torrent_hash FROM torrent_info_archives WHERE id = ?",
    )
    .bind(terminal_id)
    .fetch_one(store.pool())
    .await
    .expect("archive row");
    assert_eq!(row.0, before.site_id);
    assert_eq!(row.1, before.torrent_id);
    assert_eq!(row.2, i64::try_from(before.size_bytes).unwrap());
    assert_eq!(Some(row.3), before.torrent_hash);
}

#[tokio::test]
async fn retry_exhausted_unpushed_rows_archive_too() {
    let store = store().await;
    let now = Utc::now();

    let mut dead = sample_record("hdsky", "dead");
    dead.created_at = now - Duration::days(90);
    dead.is_pushed = Some(false);
    dead.retry_count = 3;
    store.upsert_torrent(&dead).await.expect("dead row");

    let archived = store
        .archive_torrents(Duration::days(30), 3, now)
        .await
        .expect("archive");
    assert_eq!(archived, 1);
}

#[tokio::test]
async fn list_filters_by_keyword_and_push_state() {
    let store = store().await;
    let now = Utc::now();

    let mut a = sample_record("hdsky", "1");
    a.title = "Game.of.Thrones.S01".to_string();
    a.is_pushed = Some(true);
    store.upsert_torrent(&a).await.expect("a");

    let mut b = sample_record("hdsky", "2");
    b.title = "The.Office.S01".to_string();
    store.upsert_torrent(&b).await.expect("b");

    let mut c = sample_record("mteam", "3");
    c.title = "Game.of.Thrones.S02".to_string();
    c.free_end_time = Some(now - Duration::hours(2));
    store.upsert_torrent(&c).await.expect("c");

    let keyword = store
        .list_torrents(
            &TorrentListFilter {
                keyword: Some("Thrones".to_string()),
                ..TorrentListFilter::default()
            },
            1,
            50,
            TorrentSort::default(),
        )
        .await
        .expect("keyword list");
    assert_eq!(keyword.total, 2);

    let pushed = store
        .list_torrents(
            &TorrentListFilter {
                pushed: Some(true),
                ..TorrentListFilter::default()
            },
            1,
            50,
            TorrentSort::default(),
        )
        .await
        .expect("pushed list");
    assert_eq!(pushed.total, 1);
    assert_eq!(pushed.records[0].torrent_id, "1");

    let expired = store
        .list_torrents(
            &TorrentListFilter {
                expired: Some(true),
                ..TorrentListFilter::default()
            },
            1,
            50,
            TorrentSort::default(),
        )
        .await
        .expect("expired list");
    assert_eq!(expired.total, 1);
    assert_eq!(expired.records[0].site_id, "mteam");
}

fn sample_downloader(name: &str, is_default: bool) -> DownloaderSetting {
    let now = Utc::now();
    DownloaderSetting {
        id: Uuid::new_v4(),
        name: name.to_string(),
        kind: DownloaderKind::Qbittorrent,
        url: "http://127.0.0.1:8080".to_string(),
        username: Some("admin".to_string()),
        password: Some("adminadmin".to_string()),
        is_default,
        enabled: true,
        auto_start: true,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn default_downloader_slot_is_exclusive() {
    let store = store().await;
    let first = sample_downloader("qb-main", true);
    let second = sample_downloader("tr-backup", true);

    store.upsert_downloader(&first).await.expect("first");
    store.upsert_downloader(&second).await.expect("second");

    let default = store
        .default_downloader()
        .await
        .expect("query")
        .expect("present");
    assert_eq!(default.id, second.id, "latest default claim wins");

    let all = store.list_downloaders(false).await.expect("list");
    assert_eq!(all.iter().filter(|d| d.is_default).count(), 1);

    let err = store
        .delete_downloader(second.id)
        .await
        .expect_err("default is protected");
    assert!(matches!(err, DataError::Constraint { .. }));

    store
        .delete_downloader(first.id)
        .await
        .expect("non-default deletes fine");
}

#[tokio::test]
async fn directories_enforce_single_default() {
    let store = store().await;
    let setting = sample_downloader("qb-main", true);
    store.upsert_downloader(&setting).await.expect("setting");

    let dirs = vec![
        DownloaderDirectory {
            id: Uuid::new_v4(),
            downloader_id: setting.id,
            path: "/downloads/movies".to_string(),
            alias: Some("movies".to_string()),
            is_default: true,
        },
        DownloaderDirectory {
            id: Uuid::new_v4(),
            downloader_id: setting.id,
            path: "/downloads/tv".to_string(),
            alias: None,
            is_default: true,
        },
    ];
    let err = store
        .replace_directories(setting.id, &dirs)
        .await
        .expect_err("two defaults rejected");
    assert!(matches!(err, DataError::Constraint { .. }));

    let mut fixed = dirs;
    fixed[1].is_default = false;
    store
        .replace_directories(setting.id, &fixed)
        .await
        .expect("valid set");
    let default = store
        .default_directory(setting.id)
        .await
        .expect("query")
        .expect("present");
    assert_eq!(default.path, "/downloads/movies");
}

#[tokio::test]
async fn feed_round_trip_preserves_rule_order() {
    let store = store().await;
    let now = Utc::now();

    let rule_a = FilterRule {
        id: Uuid::new_v4(),
        name: "got".to_string(),
        pattern: "Game of Thrones".to_string(),
        pattern_type: PatternType::Keyword,
        match_field: MatchField::Title,
        require_free: true,
        priority: 10,
        enabled: true,
        created_at: now,
        updated_at: now,
    };
    let rule_b = FilterRule {
        id: Uuid::new_v4(),
        name: "catch-all".to_string(),
        pattern: ".*".to_string(),
        pattern_type: PatternType::Regex,
        match_field: MatchField::Both,
        require_free: false,
        priority: 5,
        enabled: true,
        created_at: now,
        updated_at: now,
    };
    store.upsert_rule(&rule_a).await.expect("rule a");
    store.upsert_rule(&rule_b).await.expect("rule b");

    let feed = RssFeed {
        id: Uuid::new_v4(),
        site_id: "hdsky".to_string(),
        name: "movies".to_string(),
        url: "https://hdsky.me/torrentrss.php?passkey=x".to_string(),
        tag: Some("movies".to_string()),
        category: None,
        interval_minutes: 15,
        download_sub_path: None,
        enabled: true,
        pause_on_free_end: true,
        filter_rule_ids: vec![rule_b.id, rule_a.id],
        created_at: now,
        updated_at: now,
    };
    store.upsert_feed(&feed).await.expect("feed");

    let loaded = store
        .get_feed(feed.id)
        .await
        .expect("get")
        .expect("present");
    assert_eq!(loaded.filter_rule_ids, vec![rule_b.id, rule_a.id]);
    assert_eq!(loaded.interval_minutes, 15);

    let enabled = store.list_feeds(Some("hdsky"), true).await.expect("list");
    assert_eq!(enabled.len(), 1);

    store.delete_feed(feed.id).await.expect("delete");
    assert!(matches!(
        store.delete_feed(feed.id).await,
        Err(DataError::NotFound { .. })
    ));
}

#[tokio::test]
async fn rules_list_orders_by_priority() {
    let store = store().await;
    let now = Utc::now();
    for (name, priority) in [("low", 1), ("high", 9), ("mid", 5)] {
        store
            .upsert_rule(&FilterRule {
                id: Uuid::new_v4(),
                name: name.to_string(),
                pattern: "x".to_string(),
                pattern_type: PatternType::Keyword,
                match_field: MatchField::Title,
                require_free: false,
                priority,
                enabled: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .expect("rule");
    }
    let rules = store.list_rules(true).await.expect("list");
    let names: Vec<&str> = rules.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, ["high", "mid", "low"]);
}

#[tokio::test]
async fn rate_limit_journal_survives_reload() {
    let store = store().await;
    let base = Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap();

    for minute in 0..5 {
        store
            .record_hit("hdsky", base + Duration::minutes(minute))
            .await
            .expect("record");
    }
    store
        .record_hit("mteam", base)
        .await
        .expect("other site record");

    let hits = store
        .load_hits("hdsky", base + Duration::minutes(2))
        .await
        .expect("load");
    assert_eq!(hits.len(), 3, "only hits inside the window survive");
    assert!(hits.windows(2).all(|w| w[0] <= w[1]), "ordered ascending");

    let pruned = store
        .prune_hits(base + Duration::minutes(3))
        .await
        .expect("prune");
    assert_eq!(pruned, 4, "prune crosses sites");
}

#[tokio::test]
async fn global_settings_round_trip() {
    let store = store().await;
    let mut settings = store.load_global_settings().await.expect("defaults");
    assert_eq!(settings.default_interval_minutes, 30);
    assert_eq!(settings.max_retry, 3);

    settings.min_free_minutes = 30;
    settings.download_limit_enabled = true;
    settings.download_speed_limit = 20 * 1024 * 1024;
    settings.torrent_size_gb = 200;
    settings.auto_delete_on_free_end = true;
    let now = Utc::now();
    store
        .save_global_settings(&settings, now)
        .await
        .expect("save");

    let reloaded = store.load_global_settings().await.expect("reload");
    assert_eq!(reloaded.min_free_minutes, 30);
    assert!(reloaded.auto_delete_on_free_end);
    assert_eq!(reloaded.download_speed_limit, 20 * 1024 * 1024);
}

#[tokio::test]
async fn user_stats_snapshots_replace_per_site() {
    let store = store().await;
    let now = Utc::now();
    let stats = UserStats {
        username: Some("tester".to_string()),
        uploaded_bytes: 1024,
        downloaded_bytes: 512,
        ratio: 2.0,
        bonus: 1234.5,
        level: Some("Power User".to_string()),
        join_date: None,
        last_access: Some(now),
        seeding: 12,
        leeching: 1,
    };
    store
        .upsert_user_stats("hdsky", &stats, now)
        .await
        .expect("insert");

    let mut refreshed = stats.clone();
    refreshed.uploaded_bytes = 2048;
    store
        .upsert_user_stats("hdsky", &refreshed, now)
        .await
        .expect("replace");

    let all = store.list_user_stats().await.expect("list");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].stats.uploaded_bytes, 2048);
    assert_eq!(all[0].stats.ratio, 2.0);
}
