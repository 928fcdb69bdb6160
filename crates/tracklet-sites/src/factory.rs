//! Site factory: owns the live driver instances, one per configured site,
//! shared by the scheduler, the search orchestrator and the account
//! aggregator.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};
use tracklet_core::{RateLimitJournal, Site, SiteConfig, SiteProvider};

use crate::registry::{RegistryError, SiteRegistry};

/// Builds and caches driver instances keyed by site id.
pub struct SiteFactory {
    registry: Arc<SiteRegistry>,
    journal: Option<Arc<dyn RateLimitJournal>>,
    sites: RwLock<HashMap<String, Arc<dyn Site>>>,
}

impl SiteFactory {
    /// Factory over a sealed registry.
    #[must_use]
    pub fn new(registry: Arc<SiteRegistry>, journal: Option<Arc<dyn RateLimitJournal>>) -> Self {
        Self {
            registry,
            journal,
            sites: RwLock::new(HashMap::new()),
        }
    }

    /// The definition catalog behind this factory.
    #[must_use]
    pub fn registry(&self) -> &SiteRegistry {
        &self.registry
    }

    /// Apply a site configuration: build (or rebuild) the driver when the
    /// site is enabled, drop it when disabled.
    ///
    /// # Errors
    ///
    /// Returns a [`RegistryError`] when the site id is unknown or the driver
    /// cannot be constructed.
    pub fn configure(&self, config: SiteConfig) -> Result<(), RegistryError> {
        let definition =
            self.registry
                .get(&config.site_id)
                .ok_or_else(|| RegistryError::UnknownSite {
                    id: config.site_id.clone(),
                })?;

        if !config.enabled {
            if self.write_sites().remove(&config.site_id).is_some() {
                info!(site = %config.site_id, "site disabled, driver dropped");
            }
            return Ok(());
        }

        let site_id = config.site_id.clone();
        let site = self
            .registry
            .create_site(&definition, config, self.journal.clone())?;
        self.write_sites().insert(site_id.clone(), site);
        info!(site = %site_id, "site driver ready");
        Ok(())
    }

    /// Apply a batch of configurations, skipping (and logging) bad entries.
    pub fn configure_all(&self, configs: Vec<SiteConfig>) {
        for config in configs {
            let site_id = config.site_id.clone();
            if let Err(error) = self.configure(config) {
                warn!(site = %site_id, error = %error, "skipping site configuration");
            }
        }
    }

    /// Drop a site's driver.
    pub fn remove(&self, site_id: &str) {
        self.write_sites().remove(site_id);
    }

    fn read_sites(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<dyn Site>>> {
        self.sites.read().unwrap_or_else(|poisoned| {
            warn!("site map lock poisoned; continuing with recovered guard");
            poisoned.into_inner()
        })
    }

    fn write_sites(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<dyn Site>>> {
        self.sites.write().unwrap_or_else(|poisoned| {
            warn!("site map lock poisoned; continuing with recovered guard");
            poisoned.into_inner()
        })
    }
}

impl SiteProvider for SiteFactory {
    fn get(&self, site_id: &str) -> Option<Arc<dyn Site>> {
        self.read_sites().get(site_id).map(Arc::clone)
    }

    fn enabled(&self) -> Vec<Arc<dyn Site>> {
        let sites = self.read_sites();
        let mut entries: Vec<(&String, &Arc<dyn Site>)> = sites.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries.into_iter().map(|(_, site)| Arc::clone(site)).collect()
    }
}
