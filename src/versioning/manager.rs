//! Version Manager
//!
//! Deployment pipeline over the version registry.
//!
//! # Strategies
//!
//! ```text
//! safe:       validate → backup → update_version → warm_cache → verify
//! aggressive: validate → update_version → invalidate_old → warm_cache
//! gradual:    validate → backup → update_version → gradual_migration
//!             → warm_cache → verify
//! ```
//!
//! A failing step halts the pipeline. Steps already completed are not
//! rolled back; `rollback()` is the explicit way back.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, instrument, warn};

use super::registry::{VersionStatus, Versioning};
use super::version::SchemaVersion;
use crate::cache::{keys, CacheStore};
use crate::domain::ports::{Clock, Ttl};
use crate::error::{Error, Result};
use crate::warmer::CacheWarmer;

/// Lifetime of the verification probe entry.
const PROBE_TTL_SECS: u64 = 60;

// =============================================================================
// Strategies & Steps
// =============================================================================

/// Deployment strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Keep old entries reachable through backup, verify afterwards
    Safe,
    /// Drop every old entry; the only strategy allowed across majors
    Aggressive,
    /// Carry old entries over to the new version
    Gradual,
}

impl DeploymentStrategy {
    /// Ordered pipeline steps.
    pub fn steps(&self) -> &'static [DeploymentStep] {
        use DeploymentStep::*;
        match self {
            DeploymentStrategy::Safe => &[Validate, Backup, UpdateVersion, WarmCache, Verify],
            DeploymentStrategy::Aggressive => &[Validate, UpdateVersion, InvalidateOld, WarmCache],
            DeploymentStrategy::Gradual => &[
                Validate,
                Backup,
                UpdateVersion,
                GradualMigration,
                WarmCache,
                Verify,
            ],
        }
    }
}

impl FromStr for DeploymentStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "safe" => Ok(DeploymentStrategy::Safe),
            "aggressive" => Ok(DeploymentStrategy::Aggressive),
            "gradual" => Ok(DeploymentStrategy::Gradual),
            other => Err(Error::InvalidStrategy(other.to_string())),
        }
    }
}

impl std::fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentStrategy::Safe => write!(f, "safe"),
            DeploymentStrategy::Aggressive => write!(f, "aggressive"),
            DeploymentStrategy::Gradual => write!(f, "gradual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStep {
    Validate,
    Backup,
    UpdateVersion,
    InvalidateOld,
    GradualMigration,
    WarmCache,
    Verify,
}

impl DeploymentStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStep::Validate => "validate",
            DeploymentStep::Backup => "backup",
            DeploymentStep::UpdateVersion => "update_version",
            DeploymentStep::InvalidateOld => "invalidate_old",
            DeploymentStep::GradualMigration => "gradual_migration",
            DeploymentStep::WarmCache => "warm_cache",
            DeploymentStep::Verify => "verify",
        }
    }
}

impl std::fmt::Display for DeploymentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Completed,
    Skipped,
    Failed,
}

/// Outcome of one pipeline step
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepOutcome {
    pub step: DeploymentStep,
    pub status: StepStatus,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    InProgress,
    Completed,
    Failed,
}

/// Step-by-step record of one deployment
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub from: SchemaVersion,
    pub to: SchemaVersion,
    pub strategy: String,
    pub status: DeploymentStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub steps: Vec<StepOutcome>,
    /// Error if failed
    pub error: Option<String>,
}

impl DeploymentReport {
    fn new(from: SchemaVersion, to: SchemaVersion, strategy: &str, now: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            strategy: strategy.to_string(),
            status: DeploymentStatus::InProgress,
            started_at: now,
            finished_at: None,
            steps: Vec::new(),
            error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DeploymentStatus::Completed
    }

    /// Record a finished step
    fn transition(&mut self, step: DeploymentStep, status: StepStatus, message: String, started: Instant) {
        self.steps.push(StepOutcome {
            step,
            status,
            message,
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    /// Mark as failed at `step`
    fn fail(&mut self, step: DeploymentStep, reason: String, started: Instant, now: DateTime<Utc>) {
        self.transition(step, StepStatus::Failed, reason.clone(), started);
        self.status = DeploymentStatus::Failed;
        self.error = Some(reason);
        self.finished_at = Some(now);
    }

    fn finish(&mut self, now: DateTime<Utc>) {
        self.status = DeploymentStatus::Completed;
        self.finished_at = Some(now);
    }
}

/// Result of `cleanup_old_versions`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Deleted keys per cleaned version
    pub per_version: BTreeMap<String, usize>,
    pub total: usize,
}

// =============================================================================
// Version Manager
// =============================================================================

/// Runs deployments, rollbacks and cleanups
pub struct VersionManager {
    versioning: Arc<Versioning>,
    store: CacheStore,
    warmer: Option<Arc<CacheWarmer>>,
    /// Hooks the pipeline runs itself, not fired by `update_version`
    owned_hooks: Vec<String>,
    clock: Arc<dyn Clock>,
    last: Mutex<Option<DeploymentReport>>,
}

impl VersionManager {
    pub fn new(versioning: Arc<Versioning>, store: CacheStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            versioning,
            store,
            warmer: None,
            owned_hooks: Vec::new(),
            clock,
            last: Mutex::new(None),
        }
    }

    /// Warm through `warmer` during deployments.
    pub fn with_warmer(mut self, warmer: Arc<CacheWarmer>) -> Self {
        self.warmer = Some(warmer);
        self
    }

    /// Version hook whose work the `warm_cache` step already does. It is
    /// not fired by deployments, only by other version changes.
    pub fn with_warming_hook(mut self, name: impl Into<String>) -> Self {
        self.owned_hooks.push(name.into());
        self
    }

    /// Report of the most recent deployment attempt that passed format
    /// validation.
    pub fn last_deployment(&self) -> Option<DeploymentReport> {
        self.last.lock().clone()
    }

    /// Deploy `version` with the named strategy.
    ///
    /// Validation failures return their specific error. A failing later step
    /// returns `Error::DeploymentFailed` naming the step.
    #[instrument(skip(self))]
    pub async fn deploy(&self, version: &str, strategy: &str) -> Result<DeploymentReport> {
        let target = SchemaVersion::parse(version)?;
        let current = self.versioning.current_version();
        let mut report = DeploymentReport::new(current, target, strategy, self.clock.now());

        let started = Instant::now();
        let strategy = match self.validate(current, target, strategy) {
            Ok(strategy) => strategy,
            Err(e) => {
                warn!(error = %e, "Deployment rejected");
                report.fail(DeploymentStep::Validate, e.to_string(), started, self.clock.now());
                *self.last.lock() = Some(report);
                return Err(e);
            }
        };
        report.transition(
            DeploymentStep::Validate,
            StepStatus::Completed,
            format!("{} -> {}", current, target),
            started,
        );
        info!(from = %current, to = %target, %strategy, "Starting deployment");

        for step in strategy.steps().iter().skip(1) {
            let started = Instant::now();
            match self.run_step(*step, current, target).await {
                Ok(Some(message)) => {
                    report.transition(*step, StepStatus::Completed, message, started)
                }
                Ok(None) => report.transition(
                    *step,
                    StepStatus::Skipped,
                    "no warmer configured".to_string(),
                    started,
                ),
                Err(e) => {
                    let reason = e.to_string();
                    error!(step = %step, error = %reason, "Deployment step failed");
                    report.fail(*step, reason.clone(), started, self.clock.now());
                    *self.last.lock() = Some(report);
                    return Err(Error::DeploymentFailed {
                        step: step.to_string(),
                        reason,
                    });
                }
            }
        }

        report.finish(self.clock.now());
        info!(version = %target, steps = report.steps.len(), "Deployment completed");
        *self.last.lock() = Some(report.clone());
        Ok(report)
    }

    fn validate(
        &self,
        current: SchemaVersion,
        target: SchemaVersion,
        strategy: &str,
    ) -> Result<DeploymentStrategy> {
        if target == current {
            return Err(Error::SameVersion(target.to_string()));
        }
        if target < current {
            return Err(Error::VersionDowngrade {
                current: current.to_string(),
                requested: target.to_string(),
            });
        }

        let parsed = strategy.parse::<DeploymentStrategy>();
        if !target.is_compatible_with(&current) && !matches!(parsed, Ok(DeploymentStrategy::Aggressive)) {
            return Err(Error::IncompatibleVersion {
                current: current.to_string(),
                requested: target.to_string(),
                reason: "major version change requires the aggressive strategy".to_string(),
            });
        }
        parsed
    }

    /// `Ok(None)` means the step was skipped.
    async fn run_step(
        &self,
        step: DeploymentStep,
        current: SchemaVersion,
        target: SchemaVersion,
    ) -> Result<Option<String>> {
        match step {
            DeploymentStep::Validate => Ok(Some("validated".to_string())),
            DeploymentStep::Backup => {
                let history = self.versioning.get_version_history();
                self.store.put(
                    &keys::version_backup(&target.to_string()),
                    serde_json::to_value(&history)?,
                )?;
                Ok(Some(format!("backed up {} records", history.len())))
            }
            DeploymentStep::UpdateVersion => {
                let skip: Vec<&str> = match self.warmer {
                    Some(_) => self.owned_hooks.iter().map(String::as_str).collect(),
                    None => Vec::new(),
                };
                self.versioning
                    .set_version_skipping(&target.to_string(), &skip)?;
                Ok(Some(format!("active version is {}", target)))
            }
            DeploymentStep::InvalidateOld => {
                let deleted = self.versioning.invalidate_old_versions(&target)?;
                Ok(Some(format!("deleted {} entries", deleted)))
            }
            DeploymentStep::GradualMigration => {
                let migrated = self.versioning.migrate_version(
                    &current.to_string(),
                    &target.to_string(),
                    None,
                )?;
                Ok(Some(format!("migrated {} entries", migrated)))
            }
            DeploymentStep::WarmCache => match &self.warmer {
                Some(warmer) => {
                    let queued = warmer.force_startup_warming().await;
                    Ok(Some(format!("queued {} warming jobs", queued)))
                }
                None => Ok(None),
            },
            DeploymentStep::Verify => self.verify(target).map(Some),
        }
    }

    fn verify(&self, target: SchemaVersion) -> Result<String> {
        let active = self.versioning.current_version();
        if active != target {
            return Err(Error::Internal(format!(
                "active version is {}, expected {}",
                active, target
            )));
        }

        let probe = self
            .versioning
            .versioned_key(&keys::prefixed("cache:deploy_probe", &target.to_string()));
        let expected = json!({ "version": target.to_string() });
        self.store.set(&probe, expected.clone(), Ttl::Seconds(PROBE_TTL_SECS))?;
        let read = self.store.get(&probe)?;
        self.store.delete(&probe)?;

        if read.as_ref() != Some(&expected) {
            return Err(Error::Internal("probe read did not match write".to_string()));
        }
        Ok("probe write/read succeeded".to_string())
    }

    /// Re-activate the most recent version still usable and drop the
    /// abandoned one's entries.
    ///
    /// Invalidated records are passed over, so repeated rollbacks walk back
    /// through the history.
    #[instrument(skip(self))]
    pub fn rollback(&self) -> Result<SchemaVersion> {
        let history = self.versioning.get_version_history();
        let abandoned = self.versioning.current_version();
        let previous = history
            .iter()
            .skip_while(|r| !r.is_active())
            .skip(1)
            .find(|r| r.status != VersionStatus::Invalidated && r.version != abandoned)
            .map(|r| r.version)
            .ok_or(Error::NoPreviousVersion)?;

        self.versioning.set_version(&previous.to_string())?;
        let deleted = self.versioning.invalidate_version(&abandoned.to_string())?;
        info!(from = %abandoned, to = %previous, deleted, "Rolled back cache version");
        Ok(previous)
    }

    /// Keep the `keep_n` most recent records; invalidate and drop the rest.
    ///
    /// The active record always survives.
    #[instrument(skip(self))]
    pub fn cleanup_old_versions(&self, keep_n: usize) -> Result<CleanupReport> {
        let stale: Vec<SchemaVersion> = self
            .versioning
            .get_version_history()
            .into_iter()
            .skip(keep_n)
            .filter(|r| !r.is_active())
            .map(|r| r.version)
            .collect();

        let mut report = CleanupReport::default();
        for version in &stale {
            let deleted = self.versioning.invalidate_version(&version.to_string())?;
            report.per_version.insert(version.to_string(), deleted);
            report.total += deleted;
        }
        self.versioning.remove_records(&stale)?;

        info!(versions = stale.len(), deleted = report.total, "Cleaned up old versions");
        Ok(report)
    }
}

impl std::fmt::Debug for VersionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionManager")
            .field("current", &self.versioning.current_version())
            .field("warmer", &self.warmer.is_some())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryBackend, UnavailableEnrichment};
    use crate::cache::testing;
    use crate::domain::ports::CacheDomain;
    use crate::versioning::VersionStatus;
    use crate::warmer::{StaticTargets, WarmPhase, WarmTarget, WarmerConfig};
    use assert_matches::assert_matches;

    fn manager() -> (CacheStore, Arc<Versioning>, VersionManager) {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(Arc::new(MemoryBackend::new(clock.clone())), "relay_cache");
        let versioning = Arc::new(Versioning::new(
            store.clone(),
            SchemaVersion::new(1, 0, 0),
            clock.clone(),
        ));
        versioning.start().unwrap();
        let manager = VersionManager::new(versioning.clone(), store.clone(), clock);
        (store, versioning, manager)
    }

    fn seed(store: &CacheStore, base: &str, version: &str) {
        let key = crate::versioning::versioned_key(base, &SchemaVersion::parse(version).unwrap());
        store.set(&key, json!(base), Ttl::Seconds(3600)).unwrap();
    }

    #[test]
    fn test_strategy_steps() {
        assert_eq!(
            DeploymentStrategy::Aggressive.steps(),
            &[
                DeploymentStep::Validate,
                DeploymentStep::UpdateVersion,
                DeploymentStep::InvalidateOld,
                DeploymentStep::WarmCache
            ]
        );
        assert_eq!(DeploymentStrategy::Gradual.steps().len(), 6);
        assert_matches!("yolo".parse::<DeploymentStrategy>(), Err(Error::InvalidStrategy(s)) if s == "yolo");
    }

    #[tokio::test]
    async fn test_safe_deploy_runs_all_steps() {
        let (store, versioning, manager) = manager();
        let report = manager.deploy("1.1.0", "safe").await.unwrap();

        assert!(report.is_success());
        let steps: Vec<_> = report.steps.iter().map(|s| (s.step, s.status)).collect();
        assert_eq!(
            steps,
            vec![
                (DeploymentStep::Validate, StepStatus::Completed),
                (DeploymentStep::Backup, StepStatus::Completed),
                (DeploymentStep::UpdateVersion, StepStatus::Completed),
                (DeploymentStep::WarmCache, StepStatus::Skipped),
                (DeploymentStep::Verify, StepStatus::Completed),
            ]
        );
        assert_eq!(versioning.current_version(), SchemaVersion::new(1, 1, 0));

        // Backup holds the pre-deployment history
        let backup = store.get("cache:version_backup:1.1.0").unwrap().unwrap();
        assert_eq!(backup.as_array().map(Vec::len), Some(1));
        assert!(manager.last_deployment().unwrap().is_success());
    }

    #[tokio::test]
    async fn test_validation_order() {
        let (_, _, manager) = manager();

        assert_matches!(manager.deploy("1.0", "safe").await, Err(Error::InvalidVersion(_)));
        assert!(manager.last_deployment().is_none());

        assert_matches!(manager.deploy("1.0.0", "safe").await, Err(Error::SameVersion(_)));
        assert_matches!(
            manager.deploy("0.9.0", "bogus").await,
            Err(Error::VersionDowngrade { .. })
        );
        assert_matches!(
            manager.deploy("2.0.0", "safe").await,
            Err(Error::IncompatibleVersion { .. })
        );
        assert_matches!(manager.deploy("1.2.0", "bogus").await, Err(Error::InvalidStrategy(_)));

        let last = manager.last_deployment().unwrap();
        assert_eq!(last.status, DeploymentStatus::Failed);
        assert_eq!(last.steps[0].step, DeploymentStep::Validate);
    }

    #[tokio::test]
    async fn test_aggressive_crosses_major_and_drops_old_entries() {
        let (store, versioning, manager) = manager();
        seed(&store, "esi:character:1", "1.0.0");
        seed(&store, "esi:character:2", "1.0.0");

        let report = manager.deploy("2.0.0", "aggressive").await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.steps[2].message, "deleted 2 entries");
        assert!(store.get("esi:character:1:v1.0.0").unwrap().is_none());

        let history = versioning.get_version_history();
        assert_eq!(history[1].status, VersionStatus::Invalidated);
    }

    #[tokio::test]
    async fn test_gradual_migrates_entries() {
        let (store, _, manager) = manager();
        seed(&store, "esi:system:30000142", "1.0.0");

        manager.deploy("1.1.0", "gradual").await.unwrap();
        assert!(store.get("esi:system:30000142:v1.0.0").unwrap().is_none());
        assert_eq!(
            store.get("esi:system:30000142:v1.1.0").unwrap(),
            Some(json!("esi:system:30000142"))
        );
    }

    #[tokio::test]
    async fn test_warm_step_uses_warmer() {
        let clock = Arc::new(ManualClock::new());
        let facade = Arc::new(testing::facade(clock.clone()));
        let warmer = crate::warmer::CacheWarmer::new(
            WarmerConfig::default(),
            facade.clone(),
            Arc::new(UnavailableEnrichment),
            clock.clone(),
        );
        warmer.register_strategy(
            WarmPhase::Startup,
            Arc::new(StaticTargets::new(
                "fixed",
                vec![WarmTarget::new(CacheDomain::System, "30000142")],
            )),
        );
        let manager = VersionManager::new(facade.versioning().clone(), facade.store().clone(), clock)
            .with_warmer(warmer);

        let report = manager.deploy("1.0.1", "safe").await.unwrap();
        let warm = report
            .steps
            .iter()
            .find(|s| s.step == DeploymentStep::WarmCache)
            .unwrap();
        assert_eq!(warm.status, StepStatus::Completed);
        assert_eq!(warm.message, "queued 1 warming jobs");
    }

    #[tokio::test]
    async fn test_rollback() {
        let (store, versioning, manager) = manager();
        assert_matches!(manager.rollback(), Err(Error::NoPreviousVersion));

        manager.deploy("1.1.0", "safe").await.unwrap();
        seed(&store, "esi:alliance:99", "1.1.0");

        assert_eq!(manager.rollback().unwrap(), SchemaVersion::new(1, 0, 0));
        assert_eq!(versioning.current_version(), SchemaVersion::new(1, 0, 0));
        assert!(store.get("esi:alliance:99:v1.1.0").unwrap().is_none());

        let abandoned = versioning
            .get_version_history()
            .into_iter()
            .find(|r| r.version == SchemaVersion::new(1, 1, 0))
            .unwrap();
        assert_eq!(abandoned.status, VersionStatus::Invalidated);
    }

    #[tokio::test]
    async fn test_repeated_rollback_walks_back() {
        let (store, versioning, manager) = manager();
        manager.deploy("1.1.0", "safe").await.unwrap();
        manager.deploy("1.2.0", "safe").await.unwrap();
        seed(&store, "esi:system:30000142", "1.1.0");

        assert_eq!(manager.rollback().unwrap(), SchemaVersion::new(1, 1, 0));
        assert_eq!(manager.rollback().unwrap(), SchemaVersion::new(1, 0, 0));
        assert_eq!(versioning.current_version(), SchemaVersion::new(1, 0, 0));
        assert!(store.get("esi:system:30000142:v1.1.0").unwrap().is_none());

        let statuses: Vec<(String, VersionStatus)> = versioning
            .get_version_history()
            .iter()
            .map(|r| (r.version.to_string(), r.status))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("1.0.0".to_string(), VersionStatus::Active),
                ("1.1.0".to_string(), VersionStatus::Invalidated),
                ("1.2.0".to_string(), VersionStatus::Invalidated),
            ]
        );

        // Nothing usable left to go back to
        assert_matches!(manager.rollback(), Err(Error::NoPreviousVersion));
    }

    #[tokio::test]
    async fn test_cleanup_keeps_recent_records() {
        let (store, versioning, manager) = manager();
        for v in ["1.1.0", "1.2.0", "1.3.0"] {
            manager.deploy(v, "safe").await.unwrap();
        }
        seed(&store, "esi:type:587", "1.0.0");
        seed(&store, "esi:type:588", "1.0.0");
        seed(&store, "esi:type:589", "1.1.0");

        let report = manager.cleanup_old_versions(2).unwrap();
        assert_eq!(report.total, 3);
        assert_eq!(report.per_version.get("1.0.0"), Some(&2));
        assert_eq!(report.per_version.get("1.1.0"), Some(&1));

        let remaining: Vec<String> = versioning
            .get_version_history()
            .iter()
            .map(|r| r.version.to_string())
            .collect();
        assert_eq!(remaining, vec!["1.3.0", "1.2.0"]);
    }

    #[tokio::test]
    async fn test_cleanup_never_drops_active() {
        let (_, versioning, manager) = manager();
        manager.deploy("1.1.0", "safe").await.unwrap();

        manager.cleanup_old_versions(0).unwrap();
        let history = versioning.get_version_history();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_active());
    }
}
