//! Lifecycle controller tests over a stub downloader.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracklet_config::{GlobalSettings, SettingsService};
use tracklet_core::{
    AddTorrentRequest, DownloaderClient, DownloaderResult, RemoteTask, TaskProgress, TorrentRecord,
};
use tracklet_data::Store;
use tracklet_events::EventBus;
use tracklet_lifecycle::{
    ClientResolver, LifecycleController, PAUSE_REASON_DELETED, PAUSE_REASON_EXPIRED,
};
use tracklet_telemetry::Metrics;
use uuid::Uuid;

struct StubClient {
    progress: Mutex<TaskProgress>,
    paused: Mutex<Vec<String>>,
    resumed: Mutex<Vec<String>>,
    removed: Mutex<Vec<(String, bool)>>,
}

impl StubClient {
    fn with_progress(percent: f64) -> Arc<Self> {
        Arc::new(Self {
            progress: Mutex::new(TaskProgress {
                percent,
                completed: percent >= 100.0,
                state: None,
            }),
            paused: Mutex::new(Vec::new()),
            resumed: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DownloaderClient for StubClient {
    async fn ping(&self) -> DownloaderResult<()> {
        Ok(())
    }

    async fn find_task(&self, _hash: &str) -> DownloaderResult<Option<RemoteTask>> {
        Ok(None)
    }

    async fn add_torrent(&self, _request: &AddTorrentRequest) -> DownloaderResult<RemoteTask> {
        Ok(RemoteTask {
            task_id: "1".to_string(),
            name: None,
        })
    }

    async fn progress(&self, _hash: &str) -> DownloaderResult<TaskProgress> {
        Ok(self.progress.lock().expect("lock").clone())
    }

    async fn pause(&self, hash: &str) -> DownloaderResult<()> {
        self.paused.lock().expect("lock").push(hash.to_string());
        Ok(())
    }

    async fn resume(&self, hash: &str) -> DownloaderResult<()> {
        self.resumed.lock().expect("lock").push(hash.to_string());
        Ok(())
    }

    async fn remove(&self, hash: &str, delete_data: bool) -> DownloaderResult<()> {
        self.removed
            .lock()
            .expect("lock")
            .push((hash.to_string(), delete_data));
        Ok(())
    }
}

struct StubResolver {
    client: Arc<StubClient>,
}

#[async_trait]
impl ClientResolver for StubResolver {
    async fn client(&self, _downloader_id: Uuid) -> anyhow::Result<Arc<dyn DownloaderClient>> {
        Ok(Arc::clone(&self.client) as Arc<dyn DownloaderClient>)
    }
}

async fn rig(auto_delete: bool, progress: f64) -> (LifecycleController, Store, Arc<StubClient>) {
    let store = Store::connect("sqlite::memory:").await.expect("store");
    let settings = SettingsService::new(store.clone());
    settings
        .save(&GlobalSettings {
            auto_delete_on_free_end: auto_delete,
            ..GlobalSettings::default()
        })
        .await
        .expect("settings");

    let client = StubClient::with_progress(progress);
    let controller = LifecycleController::new(
        store.clone(),
        settings,
        Arc::new(StubResolver {
            client: Arc::clone(&client),
        }),
        EventBus::new(),
        Metrics::new().expect("metrics"),
    );
    (controller, store, client)
}

async fn seeded_record(store: &Store, expired_seconds_ago: i64) -> i64 {
    let now = Utc::now();
    let mut record = TorrentRecord::new("hdsky", "164895", now);
    record.title = "Test.Movie.2025".to_string();
    record.is_downloaded = true;
    record.is_pushed = Some(true);
    record.torrent_hash = Some("a94a8fe5ccb19ba61c4c0873d391e987982fbbd3".to_string());
    record.downloader_id = Some(Uuid::new_v4());
    record.downloader_name = Some("qb-main".to_string());
    record.pause_on_free_end = true;
    record.free_end_time = Some(now - chrono::Duration::seconds(expired_seconds_ago));
    store.upsert_torrent(&record).await.expect("record")
}

async fn wait_until<F>(mut probe: F)
where
    F: AsyncFnMut() -> bool,
{
    for _ in 0..500 {
        if probe().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within the timeout");
}

#[tokio::test]
async fn expired_incomplete_task_is_deleted_with_data_when_configured() {
    let (controller, store, client) = rig(true, 40.0).await;
    let record_id = seeded_record(&store, 5).await;

    controller.arm(record_id).await.expect("arm");
    wait_until(async || {
        store
            .get_torrent_by_id(record_id)
            .await
            .expect("query")
            .expect("record")
            .pause_reason
            .is_some()
    })
    .await;

    let record = store
        .get_torrent_by_id(record_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.pause_reason.as_deref(), Some(PAUSE_REASON_DELETED));
    assert!(!record.is_paused_by_system);
    assert!(!record.is_completed);
    assert!((record.progress - 40.0).abs() < f64::EPSILON);

    let removed = client.removed.lock().expect("lock");
    assert_eq!(removed.len(), 1);
    assert!(removed[0].1, "data is deleted alongside the task");
}

#[tokio::test]
async fn finished_transfer_is_marked_completed() {
    let (controller, store, client) = rig(true, 100.0).await;
    let record_id = seeded_record(&store, 5).await;

    controller.arm(record_id).await.expect("arm");
    wait_until(async || {
        store
            .get_torrent_by_id(record_id)
            .await
            .expect("query")
            .expect("record")
            .is_completed
    })
    .await;

    let record = store
        .get_torrent_by_id(record_id)
        .await
        .expect("query")
        .expect("record");
    assert!(record.is_completed);
    assert!(record.completed_at.is_some());
    assert!(
        !record.is_paused_by_system,
        "completed and system-paused are mutually exclusive"
    );
    assert!(client.removed.lock().expect("lock").is_empty());
    assert!(client.paused.lock().expect("lock").is_empty());
}

#[tokio::test]
async fn expired_incomplete_task_is_paused_by_default() {
    let (controller, store, client) = rig(false, 40.0).await;
    let record_id = seeded_record(&store, 5).await;

    controller.arm(record_id).await.expect("arm");
    wait_until(async || {
        store
            .get_torrent_by_id(record_id)
            .await
            .expect("query")
            .expect("record")
            .is_paused_by_system
    })
    .await;

    let record = store
        .get_torrent_by_id(record_id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.pause_reason.as_deref(), Some(PAUSE_REASON_EXPIRED));
    assert!(record.paused_at.is_some());
    assert_eq!(client.paused.lock().expect("lock").len(), 1);

    // Manual resume returns ownership to the user.
    controller
        .resume_paused(record_id)
        .await
        .expect("resume");
    let record = store
        .get_torrent_by_id(record_id)
        .await
        .expect("query")
        .expect("record");
    assert!(!record.is_paused_by_system);
    assert!(record.pause_reason.is_none());
    assert_eq!(client.resumed.lock().expect("lock").len(), 1);
}

#[tokio::test]
async fn sweep_arms_records_found_in_the_store() {
    let (controller, store, _client) = rig(false, 40.0).await;
    let record_id = seeded_record(&store, 5).await;

    controller.sweep().await.expect("sweep");
    wait_until(async || {
        store
            .get_torrent_by_id(record_id)
            .await
            .expect("query")
            .expect("record")
            .is_paused_by_system
    })
    .await;
}

#[tokio::test]
async fn future_windows_stay_armed_without_firing() {
    let (controller, store, client) = rig(false, 40.0).await;
    let record_id = seeded_record(&store, -3600).await;

    controller.arm(record_id).await.expect("arm");
    assert_eq!(controller.armed_count().await, 1);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client.paused.lock().expect("lock").is_empty());
    let record = store
        .get_torrent_by_id(record_id)
        .await
        .expect("query")
        .expect("record");
    assert!(!record.is_paused_by_system);

    controller.disarm(record_id).await;
    assert_eq!(controller.armed_count().await, 0);
}

#[tokio::test]
async fn delete_paused_honors_keep_data() {
    let (controller, store, client) = rig(false, 40.0).await;
    let record_id = seeded_record(&store, 5).await;

    controller.arm(record_id).await.expect("arm");
    wait_until(async || {
        store
            .get_torrent_by_id(record_id)
            .await
            .expect("query")
            .expect("record")
            .is_paused_by_system
    })
    .await;

    controller
        .delete_paused(record_id, true)
        .await
        .expect("delete keeping data");
    let removed = client.removed.lock().expect("lock");
    assert_eq!(removed.len(), 1);
    assert!(!removed[0].1, "keep_data suppresses data deletion");
}
