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

//! Free-window lifecycle controller.
//!
//! For every pushed record with the pause-at-free-end policy and a known
//! promotion end, the controller holds a one-shot timer keyed by record id.
//! A one-minute sweep backstops the timers: it arms records created while
//! the process was down, records whose timer was lost to a restart, and
//! records whose promotion end a site extended. On firing, the controller
//! reconciles progress against the downloader and completes, pauses or
//! deletes the task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracklet_config::SettingsService;
use tracklet_core::{DownloaderClient, TorrentRecord};
use tracklet_data::Store;
use tracklet_dispatch::DispatchService;
use tracklet_events::{Event, EventBus};
use tracklet_telemetry::Metrics;
use uuid::Uuid;

/// Sweep cadence backing up the dedicated timers.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Reason recorded when the expiry policy pauses a task.
pub const PAUSE_REASON_EXPIRED: &str = "free window expired";

/// Reason recorded when the expiry policy deletes a task.
pub const PAUSE_REASON_DELETED: &str = "auto-deleted at free end";

/// Resolves live downloader clients for reconciliation.
#[async_trait]
pub trait ClientResolver: Send + Sync {
    /// Client for the downloader that holds the task.
    async fn client(&self, downloader_id: Uuid) -> Result<Arc<dyn DownloaderClient>>;
}

#[async_trait]
impl ClientResolver for DispatchService {
    async fn client(&self, downloader_id: Uuid) -> Result<Arc<dyn DownloaderClient>> {
        self.client_by_id(downloader_id).await
    }
}

struct Inner {
    store: Store,
    settings: SettingsService,
    resolver: Arc<dyn ClientResolver>,
    events: EventBus,
    metrics: Metrics,
    timers: Mutex<HashMap<i64, JoinHandle<()>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

/// The controller; cheap to clone.
#[derive(Clone)]
pub struct LifecycleController {
    inner: Arc<Inner>,
}

impl LifecycleController {
    /// Build the controller.
    #[must_use]
    pub fn new(
        store: Store,
        settings: SettingsService,
        resolver: Arc<dyn ClientResolver>,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                settings,
                resolver,
                events,
                metrics,
                timers: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// Run an immediate sweep and start the periodic one.
    ///
    /// # Errors
    ///
    /// Returns an error when the initial sweep cannot read the store.
    pub async fn start(&self) -> Result<()> {
        self.sweep().await?;
        let mut sweeper = self.inner.sweeper.lock().await;
        if sweeper.is_none() {
            let controller = self.clone();
            *sweeper = Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = controller.inner.cancel.cancelled() => break,
                        () = tokio::time::sleep(SWEEP_INTERVAL) => {}
                    }
                    if let Err(error) = controller.sweep().await {
                        warn!(error = %error, "lifecycle sweep failed");
                    }
                }
            }));
            info!("lifecycle controller started");
        }
        Ok(())
    }

    /// Cancel the sweep and every armed timer.
    pub async fn stop(&self) {
        self.inner.cancel.cancel();
        if let Some(handle) = self.inner.sweeper.lock().await.take() {
            let _ = handle.await;
        }
        let mut timers = self.inner.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
        self.inner.metrics.set_armed_timers(0);
        info!("lifecycle controller stopped");
    }

    /// Number of currently armed timers.
    pub async fn armed_count(&self) -> usize {
        self.inner.timers.lock().await.len()
    }

    /// Catch-up pass: arm a timer for every candidate record that has none.
    ///
    /// # Errors
    ///
    /// Returns an error when the candidate query fails.
    pub async fn sweep(&self) -> Result<()> {
        let candidates = self.inner.store.lifecycle_candidates().await?;
        for record in candidates {
            let armed = {
                let timers = self.inner.timers.lock().await;
                timers
                    .get(&record.id)
                    .is_some_and(|handle| !handle.is_finished())
            };
            if !armed {
                self.arm_record(&record).await;
            }
        }
        Ok(())
    }

    /// Arm (or re-arm) the timer for one record by id.
    ///
    /// # Errors
    ///
    /// Returns an error when the record does not exist or carries no
    /// promotion end.
    pub async fn arm(&self, record_id: i64) -> Result<()> {
        let record = self
            .inner
            .store
            .get_torrent_by_id(record_id)
            .await?
            .ok_or_else(|| anyhow!("record {record_id} not found"))?;
        if record.free_end_time.is_none() {
            return Err(anyhow!("record {record_id} has no promotion end"));
        }
        self.arm_record(&record).await;
        Ok(())
    }

    fn arm_record<'a>(
        &'a self,
        record: &'a TorrentRecord,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let Some(end) = record.free_end_time else {
                return;
            };
            let record_id = record.id;
            let delay = (end - Utc::now())
                .to_std()
                .unwrap_or(Duration::from_secs(0));

            let controller = self.clone();
            let handle = tokio::spawn(async move {
                tokio::select! {
                    () = controller.inner.cancel.cancelled() => return,
                    () = tokio::time::sleep(delay) => {}
                }
                controller.fire(record_id).await;
            });

            let mut timers = self.inner.timers.lock().await;
            if let Some(previous) = timers.insert(record_id, handle) {
                previous.abort();
            }
            self.inner
                .metrics
                .set_armed_timers(i64::try_from(timers.len()).unwrap_or(i64::MAX));
            drop(timers);

            self.inner.events.publish(Event::FreeWindowArmed {
                record_id,
                end_time: end,
            });
            debug!(record = record_id, end = %end, "free-window timer armed");
        })
    }

    /// Drop the timer for a record.
    pub async fn disarm(&self, record_id: i64) {
        let mut timers = self.inner.timers.lock().await;
        if let Some(handle) = timers.remove(&record_id) {
            handle.abort();
        }
        self.inner
            .metrics
            .set_armed_timers(i64::try_from(timers.len()).unwrap_or(i64::MAX));
    }

    async fn fire(&self, record_id: i64) {
        // This one-shot is spent: drop the handle first (without aborting,
        // we ARE that task) so a re-arm inside reconciliation starts clean.
        // The sweep re-arms the record if reconciliation fails while it is
        // still live.
        self.take_timer(record_id).await;
        if let Err(error) = self.reconcile(record_id).await {
            warn!(record = record_id, error = %error, "free-window reconciliation failed");
        }
    }

    async fn take_timer(&self, record_id: i64) {
        let mut timers = self.inner.timers.lock().await;
        timers.remove(&record_id);
        self.inner
            .metrics
            .set_armed_timers(i64::try_from(timers.len()).unwrap_or(i64::MAX));
    }

    async fn reconcile(&self, record_id: i64) -> Result<()> {
        let Some(record) = self.inner.store.get_torrent_by_id(record_id).await? else {
            return Ok(());
        };

        // Terminal or no longer owned by the controller.
        if record.is_completed
            || record.is_paused_by_system
            || record.pause_reason.is_some()
            || !record.pause_on_free_end
            || record.is_pushed != Some(true)
        {
            return Ok(());
        }

        let now = Utc::now();
        if let Some(end) = record.free_end_time {
            if end > now {
                // The site extended the window; re-arm at the new end.
                self.arm_record(&record).await;
                return Ok(());
            }
        }

        let hash = record
            .torrent_hash
            .clone()
            .ok_or_else(|| anyhow!("record {record_id} has no info hash"))?;
        let downloader_id = record
            .downloader_id
            .ok_or_else(|| anyhow!("record {record_id} has no downloader"))?;
        let client = self.inner.resolver.client(downloader_id).await?;

        let progress = client
            .progress(&hash)
            .await
            .context("progress query failed")?;
        self.inner
            .store
            .update_torrent_progress(record_id, progress.percent, now)
            .await?;

        if progress.completed || progress.percent >= 100.0 {
            self.inner.store.mark_torrent_completed(record_id, now).await?;
            self.inner.metrics.inc_free_window_expiration("completed");
            self.inner
                .events
                .publish(Event::FreeWindowCompleted { record_id });
            info!(record = record_id, "transfer finished inside its free window");
            return Ok(());
        }

        let settings = self.inner.settings.load().await?;
        if settings.auto_delete_on_free_end {
            client.remove(&hash, true).await.context("delete failed")?;
            self.inner
                .store
                .mark_torrent_auto_deleted(record_id, PAUSE_REASON_DELETED, progress.percent, now)
                .await?;
            self.inner.metrics.inc_free_window_expiration("deleted");
            self.inner.events.publish(Event::FreeWindowDeleted {
                record_id,
                progress: progress.percent,
            });
            info!(
                record = record_id,
                progress = progress.percent,
                "incomplete task deleted at free-window end"
            );
        } else {
            client.pause(&hash).await.context("pause failed")?;
            self.inner
                .store
                .mark_torrent_system_paused(record_id, PAUSE_REASON_EXPIRED, progress.percent, now)
                .await?;
            self.inner.metrics.inc_free_window_expiration("paused");
            self.inner.events.publish(Event::FreeWindowPaused {
                record_id,
                progress: progress.percent,
            });
            info!(
                record = record_id,
                progress = progress.percent,
                "incomplete task paused at free-window end"
            );
        }
        Ok(())
    }

    /// Resume a system-paused task; clears the pause flag so the controller
    /// no longer owns the record.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is unknown, not system-paused, or
    /// the downloader call fails.
    pub async fn resume_paused(&self, record_id: i64) -> Result<()> {
        let record = self
            .inner
            .store
            .get_torrent_by_id(record_id)
            .await?
            .ok_or_else(|| anyhow!("record {record_id} not found"))?;
        if !record.is_paused_by_system {
            return Err(anyhow!("record {record_id} is not system-paused"));
        }
        let hash = record
            .torrent_hash
            .ok_or_else(|| anyhow!("record {record_id} has no info hash"))?;
        let downloader_id = record
            .downloader_id
            .ok_or_else(|| anyhow!("record {record_id} has no downloader"))?;

        let client = self.inner.resolver.client(downloader_id).await?;
        client.resume(&hash).await?;
        self.inner
            .store
            .clear_torrent_system_pause(record_id, Utc::now())
            .await?;
        Ok(())
    }

    /// Delete a system-paused task from its downloader, optionally keeping
    /// the data on disk.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is unknown, not system-paused, or
    /// the downloader call fails.
    pub async fn delete_paused(&self, record_id: i64, keep_data: bool) -> Result<()> {
        let record = self
            .inner
            .store
            .get_torrent_by_id(record_id)
            .await?
            .ok_or_else(|| anyhow!("record {record_id} not found"))?;
        if !record.is_paused_by_system {
            return Err(anyhow!("record {record_id} is not system-paused"));
        }
        let hash = record
            .torrent_hash
            .ok_or_else(|| anyhow!("record {record_id} has no info hash"))?;
        let downloader_id = record
            .downloader_id
            .ok_or_else(|| anyhow!("record {record_id} has no downloader"))?;

        let client = self.inner.resolver.client(downloader_id).await?;
        client.remove(&hash, !keep_data).await?;
        self.inner
            .store
            .mark_torrent_auto_deleted(
                record_id,
                "deleted on user request",
                record.progress,
                Utc::now(),
            )
            .await?;
        Ok(())
    }
}
