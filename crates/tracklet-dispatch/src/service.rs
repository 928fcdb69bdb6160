//! The dispatch service: idempotent delivery of torrent payloads to one or
//! more downloaders, with per-`(hash, downloader)` advisory locking and
//! push recording.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use tracklet_core::{
    AddTorrentRequest, DownloaderClient, DownloaderSetting, PushHandoff, PushOutcome,
    TorrentPusher,
};
use tracklet_data::Store;
use tracklet_data::torrents::PushStamp;
use tracklet_events::EventBus;
use tracklet_telemetry::Metrics;
use uuid::Uuid;

use crate::clients::build_client;
use crate::hash::compute_info_hash;

/// One push request, as exposed to the external control surface.
#[derive(Debug, Clone)]
pub struct PushRequest {
    /// Bencoded `.torrent` payload.
    pub bytes: Vec<u8>,
    /// Explicit downloader targets; the default downloader when empty.
    pub downloader_ids: Vec<Uuid>,
    /// Explicit save path; the target's default directory when `None`.
    pub save_path: Option<String>,
    /// Sub-path appended below the resolved save path.
    pub sub_path: Option<String>,
    /// Category forwarded to the downloader.
    pub category: Option<String>,
    /// Tags forwarded to the downloader.
    pub tags: Vec<String>,
    /// Override of the per-downloader auto-start flag.
    pub auto_start_override: Option<bool>,
}

/// Per-downloader outcome inside a [`PushReport`].
#[derive(Debug, Clone)]
pub enum PushResultKind {
    /// The downloader accepted the upload.
    Added {
        /// Task id assigned by the downloader.
        task_id: String,
    },
    /// The downloader already had the torrent; idempotent success.
    Skipped {
        /// Existing task id.
        task_id: String,
    },
    /// The downloader refused or was unreachable.
    Failed {
        /// Failure description.
        message: String,
    },
}

/// One downloader's result.
#[derive(Debug, Clone)]
pub struct DownloaderPushResult {
    /// Target downloader id.
    pub downloader_id: Uuid,
    /// Target downloader display name.
    pub downloader_name: String,
    /// What happened.
    pub kind: PushResultKind,
}

impl DownloaderPushResult {
    /// Whether this entry counts as a success (added or already present).
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(
            self.kind,
            PushResultKind::Added { .. } | PushResultKind::Skipped { .. }
        )
    }
}

/// Aggregate result of one push across its downloader set.
#[derive(Debug, Clone)]
pub struct PushReport {
    /// Info-hash computed from the payload.
    pub info_hash: String,
    /// Per-downloader results, one entry per target.
    pub results: Vec<DownloaderPushResult>,
}

impl PushReport {
    /// The aggregate succeeds when any downloader accepted or already had
    /// the torrent.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.results.iter().any(DownloaderPushResult::is_success)
    }

    /// First successful entry, used for push recording.
    #[must_use]
    pub fn first_success(&self) -> Option<&DownloaderPushResult> {
        self.results.iter().find(|result| result.is_success())
    }

    fn failure_summary(&self) -> String {
        let parts: Vec<String> = self
            .results
            .iter()
            .map(|result| match &result.kind {
                PushResultKind::Failed { message } => {
                    format!("{}: {message}", result.downloader_name)
                }
                PushResultKind::Added { .. } | PushResultKind::Skipped { .. } => {
                    format!("{}: ok", result.downloader_name)
                }
            })
            .collect();
        parts.join("; ")
    }
}

struct Inner {
    store: Store,
    events: EventBus,
    metrics: Metrics,
    clients: Mutex<HashMap<Uuid, (DateTime<Utc>, Arc<dyn DownloaderClient>)>>,
    locks: Mutex<HashMap<(String, Uuid), Arc<Mutex<()>>>>,
}

/// Idempotent push dispatcher; cheap to clone.
#[derive(Clone)]
pub struct DispatchService {
    inner: Arc<Inner>,
}

impl DispatchService {
    /// Build the service.
    #[must_use]
    pub fn new(store: Store, events: EventBus, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                events,
                metrics,
                clients: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Deliver a payload to every target, concurrently across downloaders.
    /// Per-target failures land in the report; the call itself only fails
    /// when the payload is invalid or no target at all is configured.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable payload or an empty target set.
    pub async fn push_request(&self, request: PushRequest) -> Result<PushReport> {
        let info_hash = compute_info_hash(&request.bytes)?;
        let targets = self.resolve_targets(&request.downloader_ids).await?;
        if targets.is_empty() {
            bail!("no enabled downloader is configured");
        }

        let request = Arc::new(request);
        let mut tasks = JoinSet::new();
        for setting in targets {
            let service = self.clone();
            let request = Arc::clone(&request);
            let hash = info_hash.clone();
            tasks.spawn(async move { service.push_one(setting, &hash, &request).await });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(error) => warn!(error = %error, "push task panicked"),
            }
        }
        Ok(PushReport { info_hash, results })
    }

    /// Batch variant preserving per-request reports.
    pub async fn push_many(&self, requests: Vec<PushRequest>) -> Vec<Result<PushReport>> {
        let mut reports = Vec::with_capacity(requests.len());
        for request in requests {
            reports.push(self.push_request(request).await);
        }
        reports
    }

    /// Probe one downloader.
    ///
    /// # Errors
    ///
    /// Returns an error when the downloader is unknown or unreachable.
    pub async fn health_check(&self, downloader_id: Uuid) -> Result<()> {
        let setting = self
            .inner
            .store
            .get_downloader(downloader_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown downloader {downloader_id}"))?;
        let client = self.client_for(&setting).await?;
        client.ping().await?;
        Ok(())
    }

    /// Resolve a client by downloader id, for callers outside the push path
    /// (the lifecycle controller).
    ///
    /// # Errors
    ///
    /// Returns an error when the downloader is unknown or the client cannot
    /// be built.
    pub async fn client_by_id(&self, downloader_id: Uuid) -> Result<Arc<dyn DownloaderClient>> {
        let setting = self
            .inner
            .store
            .get_downloader(downloader_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown downloader {downloader_id}"))?;
        self.client_for(&setting).await
    }

    /// Pre-seed the client cache; test plumbing.
    #[doc(hidden)]
    pub async fn inject_client(
        &self,
        downloader_id: Uuid,
        updated_at: DateTime<Utc>,
        client: Arc<dyn DownloaderClient>,
    ) {
        self.inner
            .clients
            .lock()
            .await
            .insert(downloader_id, (updated_at, client));
    }

    async fn resolve_targets(&self, ids: &[Uuid]) -> Result<Vec<DownloaderSetting>> {
        if ids.is_empty() {
            return Ok(self
                .inner
                .store
                .default_downloader()
                .await?
                .into_iter()
                .collect());
        }
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            match self.inner.store.get_downloader(*id).await? {
                Some(setting) if setting.enabled => targets.push(setting),
                Some(setting) => {
                    debug!(downloader = %setting.name, "skipping disabled downloader");
                }
                None => warn!(downloader = %id, "push names an unknown downloader"),
            }
        }
        Ok(targets)
    }

    async fn client_for(&self, setting: &DownloaderSetting) -> Result<Arc<dyn DownloaderClient>> {
        let mut clients = self.inner.clients.lock().await;
        if let Some((version, client)) = clients.get(&setting.id) {
            if *version == setting.updated_at {
                return Ok(Arc::clone(client));
            }
        }
        let client = build_client(setting)?;
        clients.insert(setting.id, (setting.updated_at, Arc::clone(&client)));
        Ok(client)
    }

    async fn advisory_lock(&self, hash: &str, downloader_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.inner.locks.lock().await;
        Arc::clone(
            locks
                .entry((hash.to_string(), downloader_id))
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    async fn push_one(
        &self,
        setting: DownloaderSetting,
        hash: &str,
        request: &PushRequest,
    ) -> DownloaderPushResult {
        let result_kind = self.push_one_inner(&setting, hash, request).await;
        DownloaderPushResult {
            downloader_id: setting.id,
            downloader_name: setting.name,
            kind: result_kind,
        }
    }

    async fn push_one_inner(
        &self,
        setting: &DownloaderSetting,
        hash: &str,
        request: &PushRequest,
    ) -> PushResultKind {
        let client = match self.client_for(setting).await {
            Ok(client) => client,
            Err(error) => {
                return PushResultKind::Failed {
                    message: error.to_string(),
                };
            }
        };

        let save_path = match self.resolve_save_path(setting, request).await {
            Ok(save_path) => save_path,
            Err(error) => {
                return PushResultKind::Failed {
                    message: error.to_string(),
                };
            }
        };

        // Two concurrent schedulers must not double-push the same torrent to
        // the same downloader; the presence probe and the upload happen
        // under one advisory lock.
        let lock = self.advisory_lock(hash, setting.id).await;
        let _guard = lock.lock().await;

        match client.find_task(hash).await {
            Ok(Some(task)) => {
                debug!(downloader = %setting.name, hash = %hash, "task already present");
                return PushResultKind::Skipped {
                    task_id: task.task_id,
                };
            }
            Ok(None) => {}
            Err(error) => {
                return PushResultKind::Failed {
                    message: error.to_string(),
                };
            }
        }

        let auto_start = request.auto_start_override.unwrap_or(setting.auto_start);
        let add = AddTorrentRequest {
            bytes: request.bytes.clone(),
            info_hash: hash.to_string(),
            save_path,
            category: request.category.clone(),
            tags: request.tags.clone(),
            paused: !auto_start,
        };
        match client.add_torrent(&add).await {
            Ok(task) => PushResultKind::Added {
                task_id: task.task_id,
            },
            Err(error) => PushResultKind::Failed {
                message: error.to_string(),
            },
        }
    }

    async fn resolve_save_path(
        &self,
        setting: &DownloaderSetting,
        request: &PushRequest,
    ) -> Result<Option<String>> {
        let base = match &request.save_path {
            Some(path) => Some(path.clone()),
            None => self
                .inner
                .store
                .default_directory(setting.id)
                .await?
                .map(|directory| directory.path),
        };
        Ok(match (base, &request.sub_path) {
            (Some(base), Some(sub)) if !sub.is_empty() => {
                Some(format!("{}/{}", base.trim_end_matches('/'), sub))
            }
            (base, _) => base,
        })
    }
}

#[async_trait::async_trait]
impl TorrentPusher for DispatchService {
    async fn push(&self, handoff: PushHandoff) -> Result<PushOutcome> {
        let request = PushRequest {
            bytes: handoff.bytes.clone(),
            downloader_ids: handoff.preferred_downloader.into_iter().collect(),
            save_path: None,
            sub_path: handoff.download_sub_path.clone(),
            category: handoff.category.clone(),
            tags: handoff.tag.clone().into_iter().collect(),
            auto_start_override: None,
        };
        let report = self.push_request(request).await?;
        let now = Utc::now();

        self.inner
            .store
            .mark_torrent_downloaded(handoff.record_id, &report.info_hash, now)
            .await?;

        match report.first_success() {
            Some(result) => {
                let task_id = match &result.kind {
                    PushResultKind::Added { task_id } | PushResultKind::Skipped { task_id } => {
                        task_id.clone()
                    }
                    PushResultKind::Failed { .. } => report.info_hash.clone(),
                };
                let already_present = matches!(result.kind, PushResultKind::Skipped { .. });
                self.inner
                    .store
                    .record_torrent_push(
                        handoff.record_id,
                        &PushStamp {
                            torrent_hash: report.info_hash.clone(),
                            downloader_id: result.downloader_id,
                            downloader_name: result.downloader_name.clone(),
                            downloader_task_id: task_id,
                            push_time: now,
                            pause_on_free_end: handoff.pause_on_free_end,
                            download_source: handoff.download_source,
                            filter_rule_id: handoff.filter_rule_id,
                        },
                    )
                    .await?;
                self.inner.metrics.inc_pushed(&result.downloader_name);
                self.inner
                    .events
                    .publish(tracklet_events::Event::TorrentPushed {
                        site_id: handoff.site_id.clone(),
                        torrent_id: handoff.torrent_id.clone(),
                        downloader: result.downloader_name.clone(),
                        already_present,
                    });
                Ok(PushOutcome::Delivered {
                    info_hash: report.info_hash.clone(),
                    downloader: result.downloader_name.clone(),
                    already_present,
                })
            }
            None => Ok(PushOutcome::Failed {
                message: report.failure_summary(),
            }),
        }
    }
}
