//! The RSS scheduler: single-shot sweeps and persistent per-feed workers.
//!
//! One worker owns one feed and nothing else; feeds never share mutable
//! state. Global settings are re-read on every tick so configuration edits
//! apply without a restart. Cancellation is cooperative: workers observe the
//! shared token between items and at every sleep.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracklet_config::{SettingsService, WorkDir};
use tracklet_core::{
    DownloadSource, ErrorKind, PushHandoff, PushOutcome, RssFeed, Site, SiteProvider,
    TorrentPusher, TorrentRecord,
};
use tracklet_data::Store;
use tracklet_events::{Event, EventBus};
use tracklet_telemetry::Metrics;
use uuid::Uuid;

use crate::eligibility::{Eligibility, EligibilityReason, evaluate};
use crate::feed::parse_feed;
use crate::matcher::MatcherCache;

/// Timeout applied to feed XML fetches.
const FEED_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Dependencies threaded into the scheduler at construction.
pub struct SchedulerDeps {
    /// State store.
    pub store: Store,
    /// Settings facade, consulted on every tick.
    pub settings: SettingsService,
    /// Live site resolver.
    pub sites: Arc<dyn SiteProvider>,
    /// Dispatch handoff.
    pub pusher: Arc<dyn TorrentPusher>,
    /// Event bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Staging directory layout.
    pub workdir: WorkDir,
}

enum ItemOutcome {
    Accepted,
    Skipped,
    Failed,
}

/// Per-feed RSS scheduler.
pub struct RssScheduler {
    store: Store,
    settings: SettingsService,
    sites: Arc<dyn SiteProvider>,
    pusher: Arc<dyn TorrentPusher>,
    events: EventBus,
    metrics: Metrics,
    workdir: WorkDir,
    client: reqwest::Client,
    matchers: MatcherCache,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: std::sync::Mutex<CancellationToken>,
    running: AtomicBool,
}

impl RssScheduler {
    /// Build the scheduler. The feed-fetch client honors the standard proxy
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns an error when the HTTP client cannot be constructed.
    pub fn new(deps: SchedulerDeps) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(FEED_FETCH_TIMEOUT)
            .user_agent(concat!("tracklet/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build feed fetch client")?;
        Ok(Self {
            store: deps.store,
            settings: deps.settings,
            sites: deps.sites,
            pusher: deps.pusher,
            events: deps.events,
            metrics: deps.metrics,
            workdir: deps.workdir,
            client,
            matchers: MatcherCache::new(),
            workers: Mutex::new(Vec::new()),
            cancel: std::sync::Mutex::new(CancellationToken::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Route feed fetches directly, ignoring the proxy environment. Used by
    /// tests against loopback servers.
    #[must_use]
    pub fn with_direct_transport(mut self) -> Self {
        match reqwest::Client::builder()
            .timeout(FEED_FETCH_TIMEOUT)
            .user_agent(concat!("tracklet/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
        {
            Ok(client) => self.client = client,
            Err(error) => warn!(error = %error, "failed to rebuild direct feed client"),
        }
        self
    }

    /// Whether persistent workers are active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn token(&self) -> CancellationToken {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| {
                warn!("cancellation lock poisoned; continuing with recovered guard");
                poisoned.into_inner()
            })
            .clone()
    }

    fn reset_token(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|poisoned| {
            warn!("cancellation lock poisoned; continuing with recovered guard");
            poisoned.into_inner()
        }) = token.clone();
        token
    }

    /// Single-shot mode: run every enabled feed once, serially per site and
    /// concurrently across sites.
    ///
    /// # Errors
    ///
    /// Returns an error when the feed list cannot be read; per-feed failures
    /// are logged and counted, not propagated.
    pub async fn run_once(self: &Arc<Self>) -> Result<()> {
        let feeds = self.store.list_feeds(None, true).await?;
        let mut by_site: BTreeMap<String, Vec<RssFeed>> = BTreeMap::new();
        for feed in feeds {
            by_site.entry(feed.site_id.clone()).or_default().push(feed);
        }

        let mut handles = Vec::with_capacity(by_site.len());
        for (site_id, feeds) in by_site {
            let Some(site) = self.sites.get(&site_id) else {
                debug!(site = %site_id, "site not constructed, feeds skipped");
                continue;
            };
            let this = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                for feed in feeds {
                    if this.token().is_cancelled() {
                        break;
                    }
                    this.run_feed(&site, &feed).await;
                }
            }));
        }
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(error = %error, "site sweep task panicked");
            }
        }
        Ok(())
    }

    /// Persistent mode: one worker per enabled feed, each looping on its
    /// effective interval until [`Self::stop`].
    ///
    /// # Errors
    ///
    /// Returns an error when the feed list cannot be read.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            return Ok(());
        }
        let token = self.reset_token();
        let feeds = self.store.list_feeds(None, true).await?;
        info!(feeds = feeds.len(), "starting persistent feed workers");
        for feed in feeds {
            let this = Arc::clone(self);
            let worker_token = token.clone();
            workers.push(tokio::spawn(async move {
                this.feed_worker(feed.id, worker_token).await;
            }));
        }
        self.metrics
            .set_active_feed_workers(i64::try_from(workers.len()).unwrap_or(i64::MAX));
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Cancel every worker and wait for them to drain. Tasks observe the
    /// token at their next I/O boundary.
    pub async fn stop(&self) {
        self.token().cancel();
        let mut workers = self.workers.lock().await;
        for handle in workers.drain(..) {
            let _ = handle.await;
        }
        self.metrics.set_active_feed_workers(0);
        self.running.store(false, Ordering::SeqCst);
        info!("feed workers stopped");
    }

    /// Run every enabled feed of one site immediately, serially.
    ///
    /// # Errors
    ///
    /// Returns an error when the site is not constructed or the feed list
    /// cannot be read.
    pub async fn trigger_site(&self, site_id: &str) -> Result<()> {
        let site = self
            .sites
            .get(site_id)
            .ok_or_else(|| anyhow!("site '{site_id}' is not enabled"))?;
        let feeds = self.store.list_feeds(Some(site_id), true).await?;
        for feed in feeds {
            self.run_feed(&site, &feed).await;
        }
        Ok(())
    }

    /// Run one feed immediately, addressed by site and feed name.
    ///
    /// # Errors
    ///
    /// Returns an error when the site or feed is unknown.
    pub async fn trigger_feed(&self, site_id: &str, feed_name: &str) -> Result<()> {
        let site = self
            .sites
            .get(site_id)
            .ok_or_else(|| anyhow!("site '{site_id}' is not enabled"))?;
        let feeds = self.store.list_feeds(Some(site_id), false).await?;
        let feed = feeds
            .into_iter()
            .find(|feed| feed.name == feed_name)
            .ok_or_else(|| anyhow!("feed '{feed_name}' not found on site '{site_id}'"))?;
        self.run_feed(&site, &feed).await;
        Ok(())
    }

    async fn feed_worker(self: Arc<Self>, feed_id: Uuid, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                break;
            }
            let feed = match self.store.get_feed(feed_id).await {
                Ok(Some(feed)) if feed.enabled => feed,
                Ok(_) => {
                    debug!(feed = %feed_id, "feed gone or disabled, worker exiting");
                    break;
                }
                Err(error) => {
                    warn!(feed = %feed_id, error = %error, "feed reload failed, worker exiting");
                    break;
                }
            };

            if let Some(site) = self.sites.get(&feed.site_id) {
                self.run_feed(&site, &feed).await;
            } else {
                debug!(site = %feed.site_id, "site not constructed, tick skipped");
            }

            let default_minutes = match self.settings.load().await {
                Ok(settings) => settings.default_interval_minutes,
                Err(error) => {
                    warn!(error = %error, "settings unavailable, using fallback interval");
                    30
                }
            };
            let interval = feed.effective_interval(default_minutes);
            tokio::select! {
                () = token.cancelled() => break,
                () = sleep(interval) => {}
            }
        }
    }

    /// One tick of one feed, with outcome accounting. Feed-level errors are
    /// contained here; the next interval retries.
    async fn run_feed(&self, site: &Arc<dyn Site>, feed: &RssFeed) {
        match self.execute_feed(site, feed).await {
            Ok((items, accepted)) => {
                self.metrics.observe_feed_tick(&feed.site_id, "ok");
                self.events.publish(Event::FeedTickFinished {
                    site_id: feed.site_id.clone(),
                    feed_id: feed.id,
                    items,
                    accepted,
                });
            }
            Err(error) => {
                self.metrics.observe_feed_tick(&feed.site_id, "error");
                warn!(
                    site = %feed.site_id,
                    feed = %feed.name,
                    error = %error,
                    "feed tick failed"
                );
            }
        }
    }

    async fn execute_feed(&self, site: &Arc<dyn Site>, feed: &RssFeed) -> Result<(u32, u32)> {
        self.events.publish(Event::FeedTickStarted {
            site_id: feed.site_id.clone(),
            feed_id: feed.id,
        });

        let settings = self.settings.load().await?;
        let xml = self.fetch_feed(&feed.url).await?;
        let items = parse_feed(&xml)?;
        let rules = self.store.get_rules(&feed.filter_rule_ids).await?;

        let mut accepted: u32 = 0;
        for item in &items {
            if self.token().is_cancelled() {
                break;
            }
            match self
                .process_item(site, feed, &settings, &rules, item)
                .await
            {
                Ok(ItemOutcome::Accepted) => accepted += 1,
                Ok(ItemOutcome::Skipped | ItemOutcome::Failed) => {}
                Err(error) => return Err(error),
            }
        }
        Ok((u32::try_from(items.len()).unwrap_or(u32::MAX), accepted))
    }

    async fn fetch_feed(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("feed fetch failed: {url}"))?
            .error_for_status()
            .with_context(|| format!("feed fetch rejected: {url}"))?;
        response.text().await.context("feed body read failed")
    }

    /// One feed item end to end. Transient failures are recorded against
    /// the record and contained; authentication failures and store errors
    /// abort the feed iteration.
    async fn process_item(
        &self,
        site: &Arc<dyn Site>,
        feed: &RssFeed,
        settings: &tracklet_config::GlobalSettings,
        rules: &[tracklet_core::FilterRule],
        item: &crate::feed::FeedItem,
    ) -> Result<ItemOutcome> {
        let key = item.dedup_key();
        let now = Utc::now();
        let existing = self.store.get_torrent(&feed.site_id, &key).await?;

        if let Some(record) = &existing {
            if record.is_pushed == Some(true)
                || record.is_skipped
                || record.retry_count >= settings.max_retry
            {
                return Ok(ItemOutcome::Skipped);
            }
        }

        let is_new = existing.is_none();
        let mut record = existing.unwrap_or_else(|| TorrentRecord::new(&feed.site_id, &key, now));
        record.title = item.title.clone();
        record.tag = feed.tag.clone();
        if record.category.is_none() {
            record.category = feed.category.clone();
        }
        record.updated_at = now;
        let record_id = self.store.upsert_torrent(&record).await?;
        record.id = record_id;

        if is_new {
            self.metrics.inc_discovered();
            self.events.publish(Event::TorrentDiscovered {
                site_id: feed.site_id.clone(),
                torrent_id: key.clone(),
                title: item.title.clone(),
            });
        }

        let detail = match site.detail(&item.reference()).await {
            Ok(detail) => detail,
            Err(error) => {
                let permanent = error.kind() == ErrorKind::Authentication;
                self.store
                    .record_torrent_failure(
                        record_id,
                        &error.to_string(),
                        permanent,
                        settings.max_retry,
                        now,
                    )
                    .await?;
                if permanent {
                    return Err(anyhow!(error).context("authentication failed, aborting feed"));
                }
                warn!(site = %feed.site_id, torrent = %key, error = %error, "detail fetch failed");
                return Ok(ItemOutcome::Failed);
            }
        };

        record.size_bytes = detail.size_bytes;
        record.free_level = detail.discount;
        record.free_end_time = detail.discount_end_time;
        if detail.category.is_some() {
            record.category = detail.category.clone();
        }
        record.updated_at = now;
        self.store.upsert_torrent(&record).await?;

        let verdict = evaluate(
            &detail,
            feed.tag.as_deref(),
            settings,
            rules,
            &self.matchers,
            now,
        );
        let reason = match verdict {
            Eligibility::Rejected { reason } => {
                self.store
                    .mark_torrent_skipped(record_id, reason, now)
                    .await?;
                self.metrics.inc_skipped(reason);
                self.events.publish(Event::TorrentSkipped {
                    site_id: feed.site_id.clone(),
                    torrent_id: key.clone(),
                    reason: reason.to_string(),
                });
                return Ok(ItemOutcome::Skipped);
            }
            Eligibility::Eligible(reason) => reason,
        };

        let bytes = match site
            .download(&detail.id, detail.download_token.as_deref())
            .await
        {
            Ok(bytes) => bytes,
            Err(error) => {
                let permanent = error.kind() == ErrorKind::Authentication;
                self.store
                    .record_torrent_failure(
                        record_id,
                        &error.to_string(),
                        permanent,
                        settings.max_retry,
                        now,
                    )
                    .await?;
                if permanent {
                    return Err(anyhow!(error).context("authentication failed, aborting feed"));
                }
                warn!(site = %feed.site_id, torrent = %key, error = %error, "payload fetch failed");
                return Ok(ItemOutcome::Failed);
            }
        };

        let staging = self
            .workdir
            .staging_path(feed.tag.as_deref(), &feed.site_id, &detail.id);
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create staging directory")?;
        }
        tokio::fs::write(&staging, &bytes)
            .await
            .with_context(|| format!("failed to stage {}", staging.display()))?;

        let (download_source, filter_rule_id) = match reason {
            EligibilityReason::DefaultFree => (DownloadSource::FreeDownload, None),
            EligibilityReason::RuleMatched { rule_id } => {
                (DownloadSource::FilterRule, Some(rule_id))
            }
        };
        let preferred_downloader = self
            .store
            .get_site_config(&feed.site_id)
            .await?
            .and_then(|config| config.downloader_id);

        let outcome = self
            .pusher
            .push(PushHandoff {
                record_id,
                site_id: feed.site_id.clone(),
                torrent_id: key.clone(),
                bytes,
                category: record.category.clone(),
                tag: feed.tag.clone(),
                download_sub_path: feed.download_sub_path.clone(),
                pause_on_free_end: feed.pause_on_free_end,
                download_source,
                filter_rule_id,
                preferred_downloader,
            })
            .await?;

        match outcome {
            PushOutcome::Delivered { info_hash, .. } => {
                // Dispatch publishes the push event itself; the pipeline
                // only records that the payload landed.
                self.events.publish(Event::TorrentDownloaded {
                    site_id: feed.site_id.clone(),
                    torrent_id: key,
                    info_hash,
                });
                Ok(ItemOutcome::Accepted)
            }
            PushOutcome::Failed { message } => {
                self.store
                    .record_torrent_failure(record_id, &message, false, settings.max_retry, now)
                    .await?;
                self.metrics.inc_push_failure();
                self.events.publish(Event::PushFailed {
                    site_id: feed.site_id.clone(),
                    torrent_id: key,
                    message,
                });
                Ok(ItemOutcome::Failed)
            }
        }
    }
}
