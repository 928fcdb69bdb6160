//! Dispatch-layer integration tests over stub downloader clients.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tracklet_core::{
    AddTorrentRequest, DownloadSource, DownloaderClient, DownloaderDirectory, DownloaderError,
    DownloaderKind, DownloaderResult, DownloaderSetting, PushHandoff, PushOutcome, RemoteTask,
    TaskProgress, TorrentPusher, TorrentRecord,
};
use tracklet_data::Store;
use tracklet_dispatch::{DispatchService, PushRequest};
use tracklet_events::EventBus;
use tracklet_telemetry::Metrics;
use tracklet_test_support::sample_torrent_bytes;
use uuid::Uuid;

#[derive(Default)]
struct StubClient {
    present: Mutex<HashSet<String>>,
    adds: Mutex<Vec<AddTorrentRequest>>,
    fail_adds: bool,
}

#[async_trait]
impl DownloaderClient for StubClient {
    async fn ping(&self) -> DownloaderResult<()> {
        Ok(())
    }

    async fn find_task(&self, hash: &str) -> DownloaderResult<Option<RemoteTask>> {
        Ok(self
            .present
            .lock()
            .expect("lock")
            .contains(hash)
            .then(|| RemoteTask {
                task_id: hash.to_string(),
                name: None,
            }))
    }

    async fn add_torrent(&self, request: &AddTorrentRequest) -> DownloaderResult<RemoteTask> {
        if self.fail_adds {
            return Err(DownloaderError::Rejected {
                name: "stub".to_string(),
                reason: "disk full".to_string(),
            });
        }
        self.present
            .lock()
            .expect("lock")
            .insert(request.info_hash.clone());
        self.adds.lock().expect("lock").push(request.clone());
        Ok(RemoteTask {
            task_id: request.info_hash.clone(),
            name: None,
        })
    }

    async fn progress(&self, _hash: &str) -> DownloaderResult<TaskProgress> {
        Ok(TaskProgress::default())
    }

    async fn pause(&self, _hash: &str) -> DownloaderResult<()> {
        Ok(())
    }

    async fn resume(&self, _hash: &str) -> DownloaderResult<()> {
        Ok(())
    }

    async fn remove(&self, _hash: &str, _delete_data: bool) -> DownloaderResult<()> {
        Ok(())
    }
}

fn setting(name: &str, is_default: bool) -> DownloaderSetting {
    let now = Utc::now();
    DownloaderSetting {
        id: Uuid::new_v4(),
        name: name.to_string(),
        kind: DownloaderKind::Qbittorrent,
        url: "http://127.0.0.1:1".to_string(),
        username: None,
        password: None,
        is_default,
        enabled: true,
        auto_start: true,
        created_at: now,
        updated_at: now,
    }
}

async fn service_with(
    store: &Store,
    settings: &[&DownloaderSetting],
) -> (DispatchService, Vec<Arc<StubClient>>) {
    let service = DispatchService::new(store.clone(), EventBus::new(), Metrics::new().unwrap());
    let mut clients = Vec::new();
    for setting in settings {
        store.upsert_downloader(setting).await.expect("setting");
        let client = Arc::new(StubClient::default());
        service
            .inject_client(
                setting.id,
                setting.updated_at,
                Arc::clone(&client) as Arc<dyn DownloaderClient>,
            )
            .await;
        clients.push(client);
    }
    (service, clients)
}

async fn seeded_record(store: &Store) -> i64 {
    let mut record = TorrentRecord::new("hdsky", "164895", Utc::now());
    record.title = "Test.Movie.2025".to_string();
    store.upsert_torrent(&record).await.expect("record")
}

fn handoff(record_id: i64) -> PushHandoff {
    PushHandoff {
        record_id,
        site_id: "hdsky".to_string(),
        torrent_id: "164895".to_string(),
        bytes: sample_torrent_bytes("Test.Movie.2025"),
        category: Some("movies".to_string()),
        tag: Some("movies".to_string()),
        download_sub_path: None,
        pause_on_free_end: true,
        download_source: DownloadSource::FreeDownload,
        filter_rule_id: None,
        preferred_downloader: None,
    }
}

#[tokio::test]
async fn push_is_idempotent_per_hash_and_downloader() {
    let store = Store::connect("sqlite::memory:").await.expect("store");
    let default = setting("qb-main", true);
    let (service, clients) = service_with(&store, &[&default]).await;
    let record_id = seeded_record(&store).await;

    let first = service.push(handoff(record_id)).await.expect("first push");
    let PushOutcome::Delivered {
        info_hash,
        already_present,
        ..
    } = first
    else {
        panic!("expected delivery");
    };
    assert!(!already_present);

    let record = store
        .get_torrent_by_id(record_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.is_pushed, Some(true));
    assert_eq!(record.torrent_hash.as_deref(), Some(info_hash.as_str()));
    assert!(record.is_downloaded);
    assert!(record.pause_on_free_end);

    let second = service.push(handoff(record_id)).await.expect("second push");
    let PushOutcome::Delivered {
        already_present, ..
    } = second
    else {
        panic!("expected idempotent delivery");
    };
    assert!(already_present, "second push is a skip, not a re-upload");
    assert_eq!(
        clients[0].adds.lock().expect("lock").len(),
        1,
        "exactly one non-skipped upload per (hash, downloader)"
    );
}

#[tokio::test]
async fn mixed_downloader_results_still_aggregate_to_success() {
    let store = Store::connect("sqlite::memory:").await.expect("store");
    let good = setting("qb-main", true);
    let bad = setting("tr-backup", false);
    let (service, _clients) = service_with(&store, &[&good]).await;

    store.upsert_downloader(&bad).await.expect("setting");
    let failing = Arc::new(StubClient {
        fail_adds: true,
        ..StubClient::default()
    });
    service
        .inject_client(
            bad.id,
            bad.updated_at,
            failing as Arc<dyn DownloaderClient>,
        )
        .await;

    let report = service
        .push_request(PushRequest {
            bytes: sample_torrent_bytes("Test.Movie.2025"),
            downloader_ids: vec![good.id, bad.id],
            save_path: None,
            sub_path: None,
            category: None,
            tags: Vec::new(),
            auto_start_override: None,
        })
        .await
        .expect("push");

    assert!(report.succeeded());
    assert_eq!(report.results.len(), 2);
    assert_eq!(
        report
            .results
            .iter()
            .filter(|result| result.is_success())
            .count(),
        1
    );
}

#[tokio::test]
async fn missing_downloaders_fail_the_request() {
    let store = Store::connect("sqlite::memory:").await.expect("store");
    let service = DispatchService::new(store, EventBus::new(), Metrics::new().unwrap());
    let err = service
        .push_request(PushRequest {
            bytes: sample_torrent_bytes("x"),
            downloader_ids: Vec::new(),
            save_path: None,
            sub_path: None,
            category: None,
            tags: Vec::new(),
            auto_start_override: None,
        })
        .await
        .expect_err("no downloader configured");
    assert!(err.to_string().contains("no enabled downloader"));
}

#[tokio::test]
async fn save_path_falls_back_to_the_default_directory() {
    let store = Store::connect("sqlite::memory:").await.expect("store");
    let default = setting("qb-main", true);
    let (service, clients) = service_with(&store, &[&default]).await;
    store
        .replace_directories(
            default.id,
            &[DownloaderDirectory {
                id: Uuid::new_v4(),
                downloader_id: default.id,
                path: "/downloads/movies".to_string(),
                alias: None,
                is_default: true,
            }],
        )
        .await
        .expect("directories");

    let record_id = seeded_record(&store).await;
    let mut request = handoff(record_id);
    request.download_sub_path = Some("remux".to_string());
    service.push(request).await.expect("push");

    let adds = clients[0].adds.lock().expect("lock");
    assert_eq!(adds.len(), 1);
    assert_eq!(adds[0].save_path.as_deref(), Some("/downloads/movies/remux"));
    assert_eq!(adds[0].category.as_deref(), Some("movies"));
    assert!(!adds[0].paused, "auto-start downloader adds running tasks");
}
