//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters relevant to the RSS, dispatch and lifecycle
//!   services.

use anyhow::Result;
use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use serde::Serialize;

/// Prometheus-backed metrics registry shared across services.
#[derive(Clone)]
pub struct Metrics {
    inner: std::sync::Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    feed_ticks_total: IntCounterVec,
    torrents_discovered_total: IntCounter,
    torrents_skipped_total: IntCounterVec,
    torrents_pushed_total: IntCounterVec,
    push_failures_total: IntCounter,
    rate_limit_rejections_total: IntCounterVec,
    free_window_expirations_total: IntCounterVec,
    account_sync_failures_total: IntCounter,
    active_feed_workers: IntGauge,
    armed_timers: IntGauge,
}

/// Snapshot of selected gauges and counters for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Feed workers currently running in persistent mode.
    pub active_feed_workers: i64,
    /// Lifecycle timers currently armed.
    pub armed_timers: i64,
    /// Total torrents handed to dispatch.
    pub torrents_pushed_total: u64,
    /// Total pushes that failed on every downloader.
    pub push_failures_total: u64,
    /// Total account synchronisation failures.
    pub account_sync_failures_total: u64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors
    /// registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let feed_ticks_total = IntCounterVec::new(
            Opts::new("feed_ticks_total", "Feed scheduler passes by outcome"),
            &["site", "outcome"],
        )?;
        let torrents_discovered_total = IntCounter::with_opts(Opts::new(
            "torrents_discovered_total",
            "Torrents sighted for the first time",
        ))?;
        let torrents_skipped_total = IntCounterVec::new(
            Opts::new(
                "torrents_skipped_total",
                "Torrents rejected by the eligibility gate, by reason",
            ),
            &["reason"],
        )?;
        let torrents_pushed_total = IntCounterVec::new(
            Opts::new(
                "torrents_pushed_total",
                "Torrents accepted by a downloader, by downloader",
            ),
            &["downloader"],
        )?;
        let push_failures_total = IntCounter::with_opts(Opts::new(
            "push_failures_total",
            "Pushes refused by every downloader in the set",
        ))?;
        let rate_limit_rejections_total = IntCounterVec::new(
            Opts::new(
                "rate_limit_rejections_total",
                "Requests rejected by the per-site sliding window",
            ),
            &["site"],
        )?;
        let free_window_expirations_total = IntCounterVec::new(
            Opts::new(
                "free_window_expirations_total",
                "Lifecycle timer firings by resulting action",
            ),
            &["action"],
        )?;
        let account_sync_failures_total = IntCounter::with_opts(Opts::new(
            "account_sync_failures_total",
            "Account statistics refreshes that failed",
        ))?;
        let active_feed_workers = IntGauge::with_opts(Opts::new(
            "active_feed_workers",
            "Feed workers currently running",
        ))?;
        let armed_timers = IntGauge::with_opts(Opts::new(
            "armed_timers",
            "Lifecycle timers currently armed",
        ))?;

        registry.register(Box::new(feed_ticks_total.clone()))?;
        registry.register(Box::new(torrents_discovered_total.clone()))?;
        registry.register(Box::new(torrents_skipped_total.clone()))?;
        registry.register(Box::new(torrents_pushed_total.clone()))?;
        registry.register(Box::new(push_failures_total.clone()))?;
        registry.register(Box::new(rate_limit_rejections_total.clone()))?;
        registry.register(Box::new(free_window_expirations_total.clone()))?;
        registry.register(Box::new(account_sync_failures_total.clone()))?;
        registry.register(Box::new(active_feed_workers.clone()))?;
        registry.register(Box::new(armed_timers.clone()))?;

        Ok(Self {
            inner: std::sync::Arc::new(MetricsInner {
                registry,
                feed_ticks_total,
                torrents_discovered_total,
                torrents_skipped_total,
                torrents_pushed_total,
                push_failures_total,
                rate_limit_rejections_total,
                free_window_expirations_total,
                account_sync_failures_total,
                active_feed_workers,
                armed_timers,
            }),
        })
    }

    /// Record one scheduler pass over a feed.
    pub fn observe_feed_tick(&self, site: &str, outcome: &str) {
        self.inner
            .feed_ticks_total
            .with_label_values(&[site, outcome])
            .inc();
    }

    /// Record a first sighting.
    pub fn inc_discovered(&self) {
        self.inner.torrents_discovered_total.inc();
    }

    /// Record an eligibility rejection.
    pub fn inc_skipped(&self, reason: &str) {
        self.inner
            .torrents_skipped_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record a successful push.
    pub fn inc_pushed(&self, downloader: &str) {
        self.inner
            .torrents_pushed_total
            .with_label_values(&[downloader])
            .inc();
    }

    /// Record a push refused by every downloader.
    pub fn inc_push_failure(&self) {
        self.inner.push_failures_total.inc();
    }

    /// Record a sliding-window rejection.
    pub fn inc_rate_limited(&self, site: &str) {
        self.inner
            .rate_limit_rejections_total
            .with_label_values(&[site])
            .inc();
    }

    /// Record a lifecycle timer firing with its resulting action.
    pub fn inc_free_window_expiration(&self, action: &str) {
        self.inner
            .free_window_expirations_total
            .with_label_values(&[action])
            .inc();
    }

    /// Record a failed account statistics refresh.
    pub fn inc_account_sync_failure(&self) {
        self.inner.account_sync_failures_total.inc();
    }

    /// Track the number of running feed workers.
    pub fn set_active_feed_workers(&self, count: i64) {
        self.inner.active_feed_workers.set(count);
    }

    /// Track the number of armed lifecycle timers.
    pub fn set_armed_timers(&self, count: i64) {
        self.inner.armed_timers.set(count);
    }

    /// Produce a compact snapshot for health endpoints.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_feed_workers: self.inner.active_feed_workers.get(),
            armed_timers: self.inner.armed_timers.get(),
            torrents_pushed_total: sum_counter_vec(&self.inner.torrents_pushed_total),
            push_failures_total: self.inner.push_failures_total.get(),
            account_sync_failures_total: self.inner.account_sync_failures_total.get(),
        }
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.inner.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

fn sum_counter_vec(vec: &IntCounterVec) -> u64 {
    let mut total = 0.0;
    for family in vec.collect() {
        for metric in family.get_metric() {
            total += metric.get_counter().value();
        }
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        total as u64
    }
}
