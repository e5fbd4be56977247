//! Cache Core Assembly
//!
//! Builds every component from `Settings` and wires the cross-component
//! links: backend removals feed metrics, version changes reset metrics and
//! trigger warming, and the manager deploys through the warmer.
//!
//! ```text
//! Settings ──▶ backend ──▶ CacheStore ──┬──▶ Versioning ──▶ hooks
//!                 │                     ├──▶ CacheMetrics ◀── removal listener
//!                 └─ removal listener   └──▶ CacheFacade ──▶ CacheWarmer
//!                                                 PerformanceMonitor ◀── metrics
//!                                                 VersionManager ──▶ warmer
//! ```

use std::sync::{Arc, Weak};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::adapters::{build_backend, PrometheusExporter, SystemClock};
use crate::cache::{CacheFacade, CacheStore, DomainConfig, RetryPolicy};
use crate::config::Settings;
use crate::domain::events::CacheEvent;
use crate::domain::ports::{Clock, EnrichmentProvider, RemovalCause};
use crate::error::Result;
use crate::metrics::{CacheMetrics, MetricsLimits};
use crate::monitor::{MonitorConfig, PerformanceMonitor};
use crate::versioning::{SchemaVersion, VersionManager, Versioning};
use crate::warmer::{CacheWarmer, RecentActivity, StaticTargets, WarmPhase, WarmerConfig};

/// Hook names registered on every core.
pub const HOOK_CACHE_WARMING: &str = "cache_warming";
pub const HOOK_METRICS_RESET: &str = "metrics_reset";
pub const HOOK_INVALIDATE_OLD: &str = "invalidate_old_versions";

/// Every cache component, wired together.
pub struct CacheCore {
    pub settings: Settings,
    pub store: CacheStore,
    pub metrics: Arc<CacheMetrics>,
    pub versioning: Arc<Versioning>,
    pub facade: Arc<CacheFacade>,
    pub warmer: Arc<CacheWarmer>,
    pub monitor: Arc<PerformanceMonitor>,
    pub manager: Arc<VersionManager>,
}

impl CacheCore {
    /// Build on the system clock.
    pub fn build(settings: Settings, enrichment: Arc<dyn EnrichmentProvider>) -> Result<Self> {
        Self::build_with_clock(settings, enrichment, Arc::new(SystemClock))
    }

    /// Validate `settings` and assemble the components.
    ///
    /// Only misconfiguration fails here; nothing is spawned until `start`.
    #[instrument(skip_all, fields(backend = %settings.cache.backend))]
    pub fn build_with_clock(
        settings: Settings,
        enrichment: Arc<dyn EnrichmentProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.validate()?;

        let domains = DomainConfig::from_settings(&settings.cache, &settings.ttl)?;
        let backend = build_backend(&settings.cache, clock.clone())?;
        let store = CacheStore::new(backend.clone(), domains.cache_name());

        let metrics = Arc::new(CacheMetrics::new(
            MetricsLimits::from(&settings.metrics),
            clock.clone(),
        ));
        metrics.attach_store(store.clone());

        let cache_name = store.cache_name().to_string();
        let listener_metrics = Arc::downgrade(&metrics);
        backend.set_removal_listener(Arc::new(move |cache: &str, key: &str, cause: RemovalCause| {
            if cache != cache_name {
                return;
            }
            let Some(metrics) = listener_metrics.upgrade() else {
                return;
            };
            let key = key.to_string();
            metrics.record(match cause {
                RemovalCause::Evicted => CacheEvent::Eviction { key },
                RemovalCause::Expired => CacheEvent::Expiration { key },
            });
        }));

        let app_version = SchemaVersion::parse(&settings.version.app_version)?;
        let versioning = Arc::new(Versioning::new(store.clone(), app_version, clock.clone()));
        versioning.start()?;

        let facade = Arc::new(
            CacheFacade::new(store.clone(), domains, versioning.clone(), metrics.clone())
                .with_retry_policy(RetryPolicy::from(&settings.retry)),
        );

        let warmer = CacheWarmer::new(
            WarmerConfig::from(&settings.warmer),
            facade.clone(),
            enrichment,
            clock.clone(),
        );
        warmer.register_strategy(
            WarmPhase::Startup,
            Arc::new(StaticTargets::priority_systems(&settings.warmer)),
        );
        warmer.register_strategy(
            WarmPhase::Startup,
            Arc::new(StaticTargets::priority_characters(&settings.warmer)),
        );
        warmer.register_strategy(
            WarmPhase::Periodic,
            Arc::new(RecentActivity::new(settings.warmer.recent_characters_limit)),
        );

        let monitor = Arc::new(PerformanceMonitor::new(
            MonitorConfig::from(&settings.monitor),
            metrics.clone(),
            clock.clone(),
        ));
        let manager = Arc::new(
            VersionManager::new(versioning.clone(), store.clone(), clock)
                .with_warmer(warmer.clone())
                .with_warming_hook(HOOK_CACHE_WARMING),
        );

        register_hooks(&versioning, &warmer, &metrics, settings.version.invalidate_on_change);

        info!(
            cache = store.cache_name(),
            backend = store.backend_name(),
            version = %versioning.current_version(),
            "Cache core assembled"
        );

        Ok(Self {
            settings,
            store,
            metrics,
            versioning,
            facade,
            warmer,
            monitor,
            manager,
        })
    }

    /// Spawn the warmer and monitor loops.
    pub fn start(&self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        vec![
            self.warmer.start(shutdown.clone()),
            tokio::spawn(self.monitor.clone().run(shutdown)),
        ]
    }

    /// Copy the current snapshots into `exporter`.
    pub fn update_exporter(&self, exporter: &PrometheusExporter) {
        exporter.update(
            &self.metrics.get_metrics(),
            Some(&self.warmer.stats()),
            Some(self.monitor.status()),
        );
    }
}

impl std::fmt::Debug for CacheCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheCore")
            .field("store", &self.store)
            .field("versioning", &self.versioning)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

// Hooks hold weak references: the versioning registry is reachable from the
// warmer through the facade.
fn register_hooks(
    versioning: &Arc<Versioning>,
    warmer: &Arc<CacheWarmer>,
    metrics: &Arc<CacheMetrics>,
    invalidate_on_change: bool,
) {
    let warmer: Weak<CacheWarmer> = Arc::downgrade(warmer);
    versioning.register_hook(HOOK_CACHE_WARMING, move |_old, _new| {
        let warmer = warmer.clone();
        async move {
            if let Some(warmer) = warmer.upgrade() {
                warmer.force_startup_warming().await;
            }
            Ok(())
        }
    });

    let metrics: Weak<CacheMetrics> = Arc::downgrade(metrics);
    versioning.register_hook(HOOK_METRICS_RESET, move |_old, _new| {
        if let Some(metrics) = metrics.upgrade() {
            metrics.reset_metrics();
        }
        async { Ok(()) }
    });

    if invalidate_on_change {
        let registry: Weak<Versioning> = Arc::downgrade(versioning);
        versioning.register_hook(HOOK_INVALIDATE_OLD, move |_old, new| {
            let registry = registry.clone();
            async move {
                match registry.upgrade() {
                    Some(registry) => registry.invalidate_old_versions(&new).map(|_| ()),
                    None => Ok(()),
                }
            }
        });
    }
}

// =============================================================================
// Tests
// =============================================================================
