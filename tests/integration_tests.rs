//! Relay Cache Integration Tests
//!
//! End-to-end behavior through the public API:
//! - Versioned entity caching and version changes
//! - Deployment hooks and the deployment pipeline
//! - Warming queue limits, timeouts and the already-cached path
//! - TTL expiry and metrics

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};

use relay_cache::adapters::{ManualClock, UnavailableEnrichment};
use relay_cache::domain::ports::EnrichmentProvider;
use relay_cache::versioning::VersionStatus;
use relay_cache::warmer::{JobOutcome, JobPriority, JobStatus, WarmTarget, WarmerConfig};
use relay_cache::{CacheCore, CacheDomain, CacheWarmer, Error, Result, SchemaVersion, Settings, Ttl};

// =============================================================================
// Fixtures
// =============================================================================

/// Enrichment stub: "hang" never answers, everything else echoes the id.
/// With a gate, each fetch waits for a permit first.
#[derive(Default)]
struct StubEnrichment {
    calls: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
}

impl StubEnrichment {
    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Some(gate),
        }
    }

    async fn fetch(&self, id: &str) -> Result<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?
                .forget();
        }
        if id == "hang" {
            std::future::pending::<()>().await;
        }
        Ok(json!({ "id": id }))
    }
}

#[async_trait]
impl EnrichmentProvider for StubEnrichment {
    async fn fetch_character(&self, id: &str) -> Result<Value> {
        self.fetch(id).await
    }
    async fn fetch_corporation(&self, id: &str) -> Result<Value> {
        self.fetch(id).await
    }
    async fn fetch_alliance(&self, id: &str) -> Result<Value> {
        self.fetch(id).await
    }
    async fn fetch_system(&self, id: &str) -> Result<Value> {
        self.fetch(id).await
    }
    async fn fetch_type(&self, id: &str) -> Result<Value> {
        self.fetch(id).await
    }
    async fn fetch_killmail(&self, id: &str, _hash: &str) -> Result<Value> {
        self.fetch(id).await
    }
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.cache.backend = "memory".into();
    settings
}

fn core_with(enrichment: Arc<dyn EnrichmentProvider>) -> (Arc<ManualClock>, CacheCore) {
    let clock = Arc::new(ManualClock::new());
    let core = CacheCore::build_with_clock(settings(), enrichment, clock.clone()).unwrap();
    (clock, core)
}

fn core() -> (Arc<ManualClock>, CacheCore) {
    core_with(Arc::new(UnavailableEnrichment))
}

// =============================================================================
// Versioned Caching
// =============================================================================

mod versioning_tests {
    use super::*;

    #[tokio::test]
    async fn test_version_change_hides_old_entries() {
        let (_, core) = core();
        let killmail = json!({ "killmail_id": 1001, "victim": { "character_id": 7 } });

        core.facade
            .put_killmail("1001", "abc", killmail.clone())
            .await
            .unwrap();
        assert_eq!(core.facade.get_killmail("1001", "abc").await.unwrap(), killmail);

        core.versioning.set_version("2.0.0").unwrap();
        assert_matches!(
            core.facade.get_killmail("1001", "abc").await,
            Err(Error::NotFound(_))
        );
        // Not deleted, only unreachable
        assert!(core
            .store
            .get("esi:killmail:1001:abc:v1.0.0")
            .unwrap()
            .is_some());

        let history = core.versioning.get_version_history();
        assert_eq!(history[0].version, SchemaVersion::new(2, 0, 0));
        assert_eq!(history[0].status, VersionStatus::Active);
        assert_eq!(history[1].status, VersionStatus::Deprecated);
    }

    #[tokio::test]
    async fn test_failing_hook_does_not_block_version_change() {
        let (_, core) = core();
        let (tx, mut rx) = mpsc::unbounded_channel();

        core.versioning.register_hook("explodes", |_, _| async {
            Err(Error::Internal("hook failure".into()))
        });
        core.versioning.register_hook("records", move |old, new| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((old, new));
                Ok(())
            }
        });

        core.versioning.set_version("1.1.0").unwrap();
        assert_eq!(core.versioning.current_version(), SchemaVersion::new(1, 1, 0));

        let (old, new) = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old, SchemaVersion::new(1, 0, 0));
        assert_eq!(new, SchemaVersion::new(1, 1, 0));
    }

    #[tokio::test]
    async fn test_history_survives_restart_on_same_store() {
        let (clock, core) = core();
        core.versioning.set_version("1.2.0").unwrap();

        let restarted = relay_cache::Versioning::new(
            core.store.clone(),
            SchemaVersion::new(1, 0, 0),
            clock,
        );
        restarted.start().unwrap();
        assert_eq!(restarted.current_version(), SchemaVersion::new(1, 2, 0));
        assert_eq!(restarted.get_version_history().len(), 2);
    }
}

// =============================================================================
// Deployment Pipeline
// =============================================================================

mod deployment_tests {
    use super::*;
    use relay_cache::versioning::{DeploymentStatus, DeploymentStep, StepStatus};

    #[tokio::test]
    async fn test_gradual_deploy_keeps_entries_reachable() {
        let (_, core) = core();
        core.facade
            .put_character("95465499", json!({ "name": "CCP Bartender" }))
            .await
            .unwrap();

        let report = core.manager.deploy("1.1.0", "gradual").await.unwrap();
        assert_eq!(report.status, DeploymentStatus::Completed);
        assert!(report
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Completed));

        assert_eq!(
            core.facade.get_character("95465499").await.unwrap(),
            json!({ "name": "CCP Bartender" })
        );
    }

    #[tokio::test]
    async fn test_rejected_then_rollback() {
        let (_, core) = core();

        assert_matches!(
            core.manager.deploy("2.0.0", "gradual").await,
            Err(Error::IncompatibleVersion { .. })
        );
        let rejected = core.manager.last_deployment().unwrap();
        assert_eq!(rejected.steps[0].step, DeploymentStep::Validate);
        assert_eq!(rejected.steps[0].status, StepStatus::Failed);

        core.manager.deploy("2.0.0", "aggressive").await.unwrap();
        core.facade.put_system("30000142", json!("Jita")).await.unwrap();

        assert_eq!(core.manager.rollback().unwrap(), SchemaVersion::new(1, 0, 0));
        assert_eq!(core.versioning.current_version(), SchemaVersion::new(1, 0, 0));
        assert!(core.store.get("esi:system:30000142:v2.0.0").unwrap().is_none());
    }
}

// =============================================================================
// Warming
// =============================================================================

mod warmer_tests {
    use super::*;

    fn warmer(core: &CacheCore, config: WarmerConfig, enrichment: Arc<StubEnrichment>) -> Arc<CacheWarmer> {
        CacheWarmer::new(
            config,
            core.facade.clone(),
            enrichment,
            Arc::new(ManualClock::new()),
        )
    }

    #[tokio::test]
    async fn test_hung_fetch_times_out() {
        let (_, core) = core();
        let config = WarmerConfig {
            job_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let warmer = warmer(&core, config, Arc::new(StubEnrichment::default()));

        let id = warmer
            .enqueue(WarmTarget::new(CacheDomain::System, "hang"), JobPriority::High)
            .unwrap();
        let job = warmer.wait_for(&id).await.unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("timeout"));
        assert_eq!(warmer.stats().timeouts, 1);
    }

    #[tokio::test]
    async fn test_queue_full_then_accepts_after_drain() {
        let (_, core) = core();
        let gate = Arc::new(Semaphore::new(0));
        let config = WarmerConfig {
            max_concurrent_jobs: 1,
            queue_size_limit: 2,
            ..Default::default()
        };
        let warmer = warmer(&core, config, Arc::new(StubEnrichment::gated(gate.clone())));

        for id in ["1", "2"] {
            warmer
                .enqueue(WarmTarget::new(CacheDomain::Character, id), JobPriority::Medium)
                .unwrap();
        }
        assert_matches!(
            warmer.enqueue(WarmTarget::new(CacheDomain::Character, "3"), JobPriority::High),
            Err(Error::QueueFull { limit: 2 })
        );

        gate.add_permits(10);
        warmer.wait_idle().await;

        assert!(warmer
            .enqueue(WarmTarget::new(CacheDomain::Character, "3"), JobPriority::High)
            .is_ok());
        warmer.wait_idle().await;
        assert_eq!(warmer.stats().completed, 3);
    }

    #[tokio::test]
    async fn test_cached_entries_skip_enrichment() {
        let (_, core) = core();
        let enrichment = Arc::new(StubEnrichment::default());
        let warmer = warmer(&core, WarmerConfig::default(), enrichment.clone());

        core.facade.put_system("30000142", json!("Jita")).await.unwrap();

        let cached = warmer
            .enqueue(WarmTarget::new(CacheDomain::System, "30000142"), JobPriority::High)
            .unwrap();
        let fetched = warmer
            .enqueue(WarmTarget::new(CacheDomain::System, "30002187"), JobPriority::High)
            .unwrap();

        assert_eq!(
            warmer.wait_for(&cached).await.unwrap().outcome,
            Some(JobOutcome::AlreadyCached)
        );
        assert_eq!(
            warmer.wait_for(&fetched).await.unwrap().outcome,
            Some(JobOutcome::Fetched)
        );
        assert_eq!(enrichment.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            core.facade.get_system("30002187").await.unwrap(),
            json!({ "id": "30002187" })
        );
    }

    #[tokio::test]
    async fn test_configured_priority_targets_warm_on_force() {
        let mut settings = settings();
        settings.warmer.priority_systems = vec!["30000142".into(), "30002187".into()];
        let enrichment = Arc::new(StubEnrichment::default());
        let core =
            CacheCore::build_with_clock(settings, enrichment.clone(), Arc::new(ManualClock::new()))
                .unwrap();

        assert_eq!(core.warmer.force_startup_warming().await, 2);
        core.warmer.wait_idle().await;
        assert!(core.facade.get_system("30000142").await.is_ok());
        assert_eq!(enrichment.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deployment_fetches_each_priority_target_once() {
        let mut settings = settings();
        settings.warmer.priority_systems = vec!["30000142".into()];
        let enrichment = Arc::new(StubEnrichment::default());
        let core =
            CacheCore::build_with_clock(settings, enrichment.clone(), Arc::new(ManualClock::new()))
                .unwrap();

        core.manager.deploy("1.1.0", "safe").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        core.warmer.wait_idle().await;

        assert_eq!(core.warmer.stats().enqueued, 1);
        assert_eq!(enrichment.calls.load(Ordering::SeqCst), 1);
        assert!(core.facade.get_system("30000142").await.is_ok());
    }
}

// =============================================================================
// TTL & Metrics
// =============================================================================

mod metrics_tests {
    use super::*;

    #[tokio::test]
    async fn test_entries_expire_on_the_clock() {
        let (clock, core) = core();
        core.facade
            .put("tracking:session", json!("live"), Some(Ttl::Seconds(10)))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(9));
        assert!(core.facade.exists("tracking:session").await);

        clock.advance(Duration::from_secs(2));
        assert_matches!(core.facade.get("tracking:session").await, Err(Error::NotFound(_)));
        assert_eq!(core.metrics.get_metrics().expirations, 1);
    }

    #[tokio::test]
    async fn test_hit_ratio_then_reset() {
        let (_, core) = core();
        core.facade.put_character("1", json!(1)).await.unwrap();

        let (hits, misses) = (6u64, 2u64);
        for _ in 0..hits {
            core.facade.get_character("1").await.unwrap();
        }
        for _ in 0..misses {
            assert!(core.facade.get_character("404").await.is_err());
        }

        let report = core.metrics.get_metrics();
        assert_eq!(report.hits, hits);
        assert_eq!(report.misses, misses);
        assert!((report.hit_ratio - hits as f64 / (hits + misses) as f64).abs() < 1e-9);
        assert_eq!(report.domains["character"].hits, hits);

        core.metrics.reset_metrics();
        assert_eq!(core.metrics.get_metrics().hit_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_monitor_grades_live_traffic() {
        let (_, core) = core();
        for id in 0..10 {
            let _ = core.facade.get_character(&id.to_string()).await;
        }
        let result = core.monitor.check();
        assert_eq!(result.sample.status, relay_cache::HealthStatus::Critical);
        assert_eq!(result.fired.len(), 1);
        assert!(!core.monitor.recommendations().is_empty());
    }
}
