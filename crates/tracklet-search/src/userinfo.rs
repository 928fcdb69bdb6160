//! Account statistics: per-site refresh and cross-site aggregation.
//!
//! Failures are per-site and never poison the aggregate; a failing site
//! keeps its previous stored snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::warn;
use tracklet_core::{SiteProvider, UserStats};
use tracklet_data::Store;
use tracklet_events::{Event, EventBus};
use tracklet_telemetry::Metrics;

/// Cross-site account totals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AggregatedStats {
    /// Sum of uploaded bytes across sites.
    pub total_uploaded: u64,
    /// Sum of downloaded bytes across sites.
    pub total_downloaded: u64,
    /// Ratio averaged across sites, weighted by uploaded bytes.
    pub average_ratio: f64,
    /// Sum of seeding counts.
    pub total_seeding: u32,
    /// Sum of leeching counts.
    pub total_leeching: u32,
    /// Sum of bonus balances.
    pub total_bonus: f64,
    /// Number of sites contributing a snapshot.
    pub site_count: usize,
    /// Most recent snapshot timestamp.
    pub last_update: Option<DateTime<Utc>>,
}

/// Account statistics service.
#[derive(Clone)]
pub struct UserInfoService {
    sites: Arc<dyn SiteProvider>,
    store: Store,
    events: EventBus,
    metrics: Metrics,
}

impl UserInfoService {
    /// Build the service.
    #[must_use]
    pub fn new(
        sites: Arc<dyn SiteProvider>,
        store: Store,
        events: EventBus,
        metrics: Metrics,
    ) -> Self {
        Self {
            sites,
            store,
            events,
            metrics,
        }
    }

    /// Refresh one site's snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the site is unknown or the fetch fails; the
    /// previous snapshot is left untouched in that case.
    pub async fn fetch(&self, site_id: &str) -> Result<UserStats> {
        let site = self
            .sites
            .get(site_id)
            .ok_or_else(|| anyhow!("site '{site_id}' is not enabled"))?;
        match site.user_info().await {
            Ok(stats) => {
                self.store
                    .upsert_user_stats(site_id, &stats, Utc::now())
                    .await?;
                self.events.publish(Event::AccountSynced {
                    site_id: site_id.to_string(),
                });
                Ok(stats)
            }
            Err(error) => {
                self.metrics.inc_account_sync_failure();
                self.events.publish(Event::AccountSyncFailed {
                    site_id: site_id.to_string(),
                    message: error.to_string(),
                });
                warn!(site = %site_id, error = %error, "account refresh failed");
                Err(error.into())
            }
        }
    }

    /// Refresh every enabled site concurrently. Returns per-site outcomes;
    /// failing sites keep their previous snapshot.
    pub async fn fetch_all(&self) -> BTreeMap<String, Result<UserStats>> {
        let mut tasks = JoinSet::new();
        for site in self.sites.enabled() {
            let site_id = site.id().to_string();
            tasks.spawn(async move {
                let outcome = site.user_info().await;
                (site_id, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((site_id, outcome)) = joined else {
                continue;
            };
            match outcome {
                Ok(stats) => {
                    if let Err(error) = self
                        .store
                        .upsert_user_stats(&site_id, &stats, Utc::now())
                        .await
                    {
                        warn!(site = %site_id, error = %error, "snapshot write failed");
                    }
                    self.events.publish(Event::AccountSynced {
                        site_id: site_id.clone(),
                    });
                    outcomes.insert(site_id, Ok(stats));
                }
                Err(error) => {
                    self.metrics.inc_account_sync_failure();
                    self.events.publish(Event::AccountSyncFailed {
                        site_id: site_id.clone(),
                        message: error.to_string(),
                    });
                    outcomes.insert(site_id, Err(error.into()));
                }
            }
        }
        outcomes
    }

    /// Compute the aggregate over every stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn aggregated(&self) -> Result<AggregatedStats> {
        let snapshots = self.store.list_user_stats().await?;
        let mut aggregate = AggregatedStats {
            site_count: snapshots.len(),
            ..AggregatedStats::default()
        };

        let mut weighted_ratio = 0.0;
        for snapshot in &snapshots {
            let stats = &snapshot.stats;
            aggregate.total_uploaded += stats.uploaded_bytes;
            aggregate.total_downloaded += stats.downloaded_bytes;
            aggregate.total_seeding += stats.seeding;
            aggregate.total_leeching += stats.leeching;
            aggregate.total_bonus += stats.bonus;
            weighted_ratio += stats.ratio * uploaded_weight(stats);
            aggregate.last_update = match aggregate.last_update {
                Some(latest) if latest >= snapshot.updated_at => Some(latest),
                _ => Some(snapshot.updated_at),
            };
        }
        if aggregate.total_uploaded > 0 {
            aggregate.average_ratio = weighted_ratio / uploaded_total(&aggregate);
        }
        Ok(aggregate)
    }
}

#[allow(clippy::cast_precision_loss)]
fn uploaded_weight(stats: &UserStats) -> f64 {
    stats.uploaded_bytes as f64
}

#[allow(clippy::cast_precision_loss)]
fn uploaded_total(aggregate: &AggregatedStats) -> f64 {
    aggregate.total_uploaded as f64
}
