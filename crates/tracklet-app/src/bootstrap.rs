//! Application bootstrap: explicit registration, dependency construction,
//! background maintenance and shutdown.
//!
//! Nothing here is a global: every service receives its dependencies
//! through [`AppContext`], and tests construct the same struct against a
//! temporary work directory.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracklet_config::{SettingsService, WorkDir};
use tracklet_core::{RateLimitJournal, SiteProvider, TorrentPusher};
use tracklet_data::Store;
use tracklet_dispatch::DispatchService;
use tracklet_events::EventBus;
use tracklet_lifecycle::LifecycleController;
use tracklet_rss::{RssScheduler, SchedulerDeps};
use tracklet_search::{SearchOrchestrator, UserInfoService};
use tracklet_sites::{SiteFactory, SiteRegistry, builtin};
use tracklet_telemetry::{LoggingConfig, Metrics};

use crate::error::{AppError, AppResult};

/// Cadence of the archive/prune maintenance sweep.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Cadence of the background account statistics refresh.
const ACCOUNT_SYNC_INTERVAL: Duration = Duration::from_secs(6 * 3600);

/// Every constructed service, threaded through explicitly.
pub struct AppContext {
    /// Work-directory layout.
    pub workdir: WorkDir,
    /// State store.
    pub store: Store,
    /// Event bus.
    pub events: EventBus,
    /// Metrics registry.
    pub metrics: Metrics,
    /// Settings facade.
    pub settings: SettingsService,
    /// Sealed definition catalog.
    pub registry: Arc<SiteRegistry>,
    /// Live site factory.
    pub factory: Arc<SiteFactory>,
    /// Downloader dispatch.
    pub dispatch: DispatchService,
    /// RSS scheduler.
    pub scheduler: Arc<RssScheduler>,
    /// Free-window controller.
    pub lifecycle: LifecycleController,
    /// Multi-site search front end.
    pub search: SearchOrchestrator,
    /// Account statistics service.
    pub accounts: UserInfoService,
}

impl AppContext {
    /// Construct every service against the given work directory.
    ///
    /// # Errors
    ///
    /// Returns an error when the work directory, store or any subsystem
    /// cannot be initialised, or when the definition catalog is empty.
    pub async fn build(workdir: WorkDir) -> AppResult<Self> {
        workdir.ensure().map_err(|source| AppError::Io {
            operation: "workdir.ensure",
            source,
        })?;

        let store = Store::connect(&workdir.database_url())
            .await
            .map_err(|error| AppError::component("store")(anyhow!(error)))?;
        let events = EventBus::new();
        let metrics = Metrics::new().map_err(AppError::component("metrics"))?;
        let settings = SettingsService::new(store.clone());

        let mut registry = SiteRegistry::new();
        builtin::register_all(&mut registry)
            .map_err(|error| AppError::component("registry")(anyhow!(error)))?;
        if registry.all().is_empty() {
            return Err(AppError::Catalog {
                message: "no site definitions registered".to_string(),
            });
        }
        for issue in registry.validate() {
            warn!(issue = %issue, "site catalog validation issue");
        }
        let registry = Arc::new(registry);

        let journal: Arc<dyn RateLimitJournal> = Arc::new(store.clone());
        let factory = Arc::new(SiteFactory::new(Arc::clone(&registry), Some(journal)));
        let configs = store
            .list_site_configs()
            .await
            .map_err(|error| AppError::component("site_configs")(anyhow!(error)))?;
        factory.configure_all(configs);

        let dispatch = DispatchService::new(store.clone(), events.clone(), metrics.clone());
        let provider: Arc<dyn SiteProvider> = Arc::clone(&factory) as Arc<dyn SiteProvider>;

        let scheduler = Arc::new(
            RssScheduler::new(SchedulerDeps {
                store: store.clone(),
                settings: settings.clone(),
                sites: Arc::clone(&provider),
                pusher: Arc::new(dispatch.clone()) as Arc<dyn TorrentPusher>,
                events: events.clone(),
                metrics: metrics.clone(),
                workdir: workdir.clone(),
            })
            .map_err(AppError::component("scheduler"))?,
        );

        let lifecycle = LifecycleController::new(
            store.clone(),
            settings.clone(),
            Arc::new(dispatch.clone()),
            events.clone(),
            metrics.clone(),
        );

        let search = SearchOrchestrator::new(Arc::clone(&provider));
        let accounts = UserInfoService::new(
            Arc::clone(&provider),
            store.clone(),
            events.clone(),
            metrics.clone(),
        );

        Ok(Self {
            workdir,
            store,
            events,
            metrics,
            settings,
            registry,
            factory,
            dispatch,
            scheduler,
            lifecycle,
            search,
            accounts,
        })
    }

    /// Start the background services per configuration: the lifecycle
    /// controller always, the persistent scheduler when auto-start is set.
    ///
    /// # Errors
    ///
    /// Returns an error when a service fails to start.
    pub async fn start_background(&self) -> AppResult<()> {
        self.lifecycle
            .start()
            .await
            .map_err(AppError::component("lifecycle"))?;

        let settings = self
            .settings
            .load()
            .await
            .map_err(|error| AppError::component("settings")(anyhow!(error)))?;
        if settings.rss_auto_start {
            self.scheduler
                .start()
                .await
                .map_err(AppError::component("scheduler"))?;
        }
        Ok(())
    }

    /// Spawn the hourly maintenance sweep: archive terminal records and
    /// prune the rate-limit journal past the widest configured window.
    #[must_use]
    pub fn spawn_maintenance(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let settings = self.settings.clone();
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            loop {
                if let Err(error) = run_maintenance(&store, &settings, &registry).await {
                    warn!(error = %error, "maintenance sweep failed");
                }
                tokio::time::sleep(MAINTENANCE_INTERVAL).await;
            }
        })
    }

    /// Spawn the periodic account statistics refresh.
    #[must_use]
    pub fn spawn_account_sync(&self) -> JoinHandle<()> {
        let accounts = self.accounts.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(ACCOUNT_SYNC_INTERVAL).await;
                let outcomes = accounts.fetch_all().await;
                let failures = outcomes.values().filter(|outcome| outcome.is_err()).count();
                if failures > 0 {
                    warn!(failures, "account refresh finished with failures");
                }
            }
        })
    }

    /// Stop background services in dependency order.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.lifecycle.stop().await;
        info!("background services stopped");
    }
}

async fn run_maintenance(
    store: &Store,
    settings: &SettingsService,
    registry: &SiteRegistry,
) -> anyhow::Result<()> {
    let now = chrono::Utc::now();
    let settings = settings.load().await?;

    let archived = store
        .archive_torrents(settings.archive_retention(), settings.max_retry, now)
        .await?;
    if archived > 0 {
        info!(archived, "terminal records moved to the archive");
    }

    let widest = registry
        .all()
        .iter()
        .filter_map(|definition| definition.rate.window)
        .max()
        .unwrap_or(Duration::from_secs(3600));
    let horizon = now
        - chrono::Duration::from_std(widest).unwrap_or_else(|_| chrono::Duration::hours(1));
    let pruned = store.prune_hits(horizon).await?;
    if pruned > 0 {
        info!(pruned, "stale rate-limit journal entries dropped");
    }
    Ok(())
}

/// Entry point for the service boot sequence.
///
/// # Errors
///
/// Returns an error when initialisation fails; runtime errors inside the
/// background services are logged and contained.
pub async fn run_app() -> AppResult<()> {
    let logging = LoggingConfig::default();
    if let Err(error) = tracklet_telemetry::init_logging(&logging) {
        eprintln!("logging setup failed: {error}");
    }

    let workdir = WorkDir::resolve(None);
    info!(root = %workdir.root().display(), "Tracklet starting");

    let context = AppContext::build(workdir).await?;
    context.start_background().await?;
    let maintenance = context.spawn_maintenance();
    let account_sync = context.spawn_account_sync();

    tokio::signal::ctrl_c()
        .await
        .map_err(|source| AppError::Io {
            operation: "signal.ctrl_c",
            source,
        })?;
    info!("shutdown signal received");

    maintenance.abort();
    let _ = maintenance.await;
    account_sync.abort();
    let _ = account_sync.await;
    context.shutdown().await;
    Ok(())
}
