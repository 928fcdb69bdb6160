//! Control surface: the operations exposed to the surrounding system (HTTP
//! handlers, CLI, tests). Everything here delegates to the constructed
//! services; no business logic lives at this layer.

use std::sync::Arc;

use anyhow::Result;
use tracklet_config::GlobalSettings;
use tracklet_core::{SiteConfig, SiteProvider, UserStats};
use tracklet_data::{TorrentListFilter, TorrentPage, TorrentSort};
use tracklet_dispatch::{PushReport, PushRequest};
use tracklet_search::{AggregatedStats, MultiSearchQuery, MultiSearchResult};
use tracklet_sites::SiteDefinition;
use uuid::Uuid;

use crate::bootstrap::AppContext;

/// Read-model row for the site listing.
#[derive(Debug, Clone)]
pub struct SiteOverview {
    /// Definition id.
    pub id: &'static str,
    /// Display name.
    pub display_name: &'static str,
    /// Schema label.
    pub schema: &'static str,
    /// Whether a driver is currently constructed.
    pub enabled: bool,
    /// Whether the definition is marked unavailable.
    pub unavailable: bool,
}

impl AppContext {
    // --- scheduler control ---

    /// Start the persistent scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error when the feed list cannot be read.
    pub async fn scheduler_start(&self) -> Result<()> {
        self.scheduler.start().await
    }

    /// Stop the persistent scheduler.
    pub async fn scheduler_stop(&self) {
        self.scheduler.stop().await;
    }

    /// Tick every enabled feed of one site now.
    ///
    /// # Errors
    ///
    /// Returns an error when the site is unknown or disabled.
    pub async fn trigger_site(&self, site_id: &str) -> Result<()> {
        self.scheduler.trigger_site(site_id).await
    }

    /// Tick one feed now.
    ///
    /// # Errors
    ///
    /// Returns an error when the site or feed is unknown.
    pub async fn trigger_feed(&self, site_id: &str, feed_name: &str) -> Result<()> {
        self.scheduler.trigger_feed(site_id, feed_name).await
    }

    // --- site read surface ---

    /// Every known site with its current construction state.
    #[must_use]
    pub fn list_sites(&self) -> Vec<SiteOverview> {
        self.registry
            .all()
            .into_iter()
            .map(|definition| SiteOverview {
                id: definition.id,
                display_name: definition.display_name,
                schema: definition.schema.as_str(),
                enabled: self.factory.get(definition.id).is_some(),
                unavailable: definition.unavailable,
            })
            .collect()
    }

    /// One site definition.
    #[must_use]
    pub fn get_site_definition(&self, site_id: &str) -> Option<Arc<SiteDefinition>> {
        self.registry.get(site_id)
    }

    /// One site's stored configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn get_site_config(&self, site_id: &str) -> Result<Option<SiteConfig>> {
        Ok(self.settings.site_config(site_id).await?)
    }

    /// Validate, persist and apply a site configuration.
    ///
    /// # Errors
    ///
    /// Returns an error when validation fails or the driver cannot be
    /// rebuilt.
    pub async fn apply_site_config(&self, config: SiteConfig) -> Result<()> {
        let definition = self
            .registry
            .get(&config.site_id)
            .ok_or_else(|| anyhow::anyhow!("unknown site '{}'", config.site_id))?;
        self.settings
            .upsert_site_config(definition.auth_method, &config)
            .await?;
        self.factory.configure(config)?;
        Ok(())
    }

    // --- search ---

    /// Cross-site search.
    pub async fn search(&self, query: &MultiSearchQuery) -> MultiSearchResult {
        self.search.search(query).await
    }

    /// Drop every cached search result.
    pub fn search_cache_clear(&self) {
        self.search.cache_clear();
    }

    /// Number of cached search results.
    #[must_use]
    pub fn search_cache_size(&self) -> usize {
        self.search.cache_size()
    }

    // --- account statistics ---

    /// Refresh one site's account snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the fetch fails; the previous snapshot stays.
    pub async fn account_fetch(&self, site_id: &str) -> Result<UserStats> {
        self.accounts.fetch(site_id).await
    }

    /// Refresh every enabled site.
    pub async fn account_fetch_all(
        &self,
    ) -> std::collections::BTreeMap<String, Result<UserStats>> {
        self.accounts.fetch_all().await
    }

    /// Aggregate totals over every stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn account_aggregated(&self) -> Result<AggregatedStats> {
        self.accounts.aggregated().await
    }

    // --- downloader dispatch ---

    /// Push a payload to the configured downloader set.
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable payload or empty target set;
    /// per-downloader failures land inside the report.
    pub async fn push(&self, request: PushRequest) -> Result<PushReport> {
        self.dispatch.push_request(request).await
    }

    /// Batch push preserving per-request reports.
    pub async fn batch_push(&self, requests: Vec<PushRequest>) -> Vec<Result<PushReport>> {
        self.dispatch.push_many(requests).await
    }

    /// Probe one downloader.
    ///
    /// # Errors
    ///
    /// Returns an error when the downloader is unknown or unreachable.
    pub async fn downloader_health(&self, downloader_id: Uuid) -> Result<()> {
        self.dispatch.health_check(downloader_id).await
    }

    // --- lifecycle ---

    /// Arm the free-window timer for a record.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is unknown or has no promotion end.
    pub async fn lifecycle_arm(&self, record_id: i64) -> Result<()> {
        self.lifecycle.arm(record_id).await
    }

    /// Drop the timer for a record.
    pub async fn lifecycle_disarm(&self, record_id: i64) {
        self.lifecycle.disarm(record_id).await;
    }

    /// Resume a system-paused task.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is not system-paused.
    pub async fn lifecycle_resume(&self, record_id: i64) -> Result<()> {
        self.lifecycle.resume_paused(record_id).await
    }

    /// Delete a system-paused task, optionally keeping data.
    ///
    /// # Errors
    ///
    /// Returns an error when the record is not system-paused.
    pub async fn lifecycle_delete(&self, record_id: i64, keep_data: bool) -> Result<()> {
        self.lifecycle.delete_paused(record_id, keep_data).await
    }

    // --- repository ---

    /// Page through torrent records.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn list_torrents(
        &self,
        filter: &TorrentListFilter,
        page: u32,
        page_size: u32,
        sort: TorrentSort,
    ) -> Result<TorrentPage> {
        Ok(self.store.list_torrents(filter, page, page_size, sort).await?)
    }

    /// Archive terminal records older than the configured retention.
    ///
    /// # Errors
    ///
    /// Returns an error when the store operation fails.
    pub async fn archive_now(&self) -> Result<u64> {
        let settings = self.settings.load().await?;
        Ok(self
            .store
            .archive_torrents(
                settings.archive_retention(),
                settings.max_retry,
                chrono::Utc::now(),
            )
            .await?)
    }

    /// Current global settings.
    ///
    /// # Errors
    ///
    /// Returns an error when the store read fails.
    pub async fn global_settings(&self) -> Result<GlobalSettings> {
        Ok(self.settings.load().await?)
    }

    /// Validate and persist global settings.
    ///
    /// # Errors
    ///
    /// Returns an error for out-of-range values.
    pub async fn update_global_settings(&self, settings: &GlobalSettings) -> Result<()> {
        self.settings.save(settings).await?;
        self.events
            .publish(tracklet_events::Event::SettingsChanged {
                description: "global settings updated".to_string(),
            });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracklet_config::WorkDir;

    #[tokio::test]
    async fn control_surface_reads_the_catalog_and_settings() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = AppContext::build(WorkDir::at(temp.path().join("pt-tools")))
            .await
            .expect("context");

        let sites = context.list_sites();
        assert!(sites.iter().any(|site| site.id == "hdsky"));
        assert!(sites.iter().all(|site| !site.enabled));

        let definition = context.get_site_definition("hdsky").expect("definition");
        assert!(!definition.base_urls.is_empty());

        assert!(context.get_site_config("hdsky").await.expect("query").is_none());
        assert_eq!(context.search_cache_size(), 0);

        let err = context
            .trigger_feed("hdsky", "nope")
            .await
            .expect_err("site not enabled");
        assert!(err.to_string().contains("not enabled"));

        context.shutdown().await;
    }

    #[tokio::test]
    async fn site_config_round_trips_and_builds_a_driver() {
        let temp = tempfile::tempdir().expect("tempdir");
        let context = AppContext::build(WorkDir::at(temp.path().join("pt-tools")))
            .await
            .expect("context");

        let config = SiteConfig {
            site_id: "hdsky".to_string(),
            enabled: true,
            cookie: Some("uid=1; pass=abc".to_string()),
            ..SiteConfig::default()
        };
        context.apply_site_config(config).await.expect("apply");
        assert!(context.factory.get("hdsky").is_some());
        assert!(
            context
                .list_sites()
                .iter()
                .any(|site| site.id == "hdsky" && site.enabled)
        );

        // Credential validation guards the enabled path.
        let bad = SiteConfig {
            site_id: "hdsky".to_string(),
            enabled: true,
            ..SiteConfig::default()
        };
        assert!(context.apply_site_config(bad).await.is_err());

        context.shutdown().await;
    }
}
