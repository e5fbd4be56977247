//! Version Registry
//!
//! Owns the active schema version, its persisted history and the deployment
//! hooks fired on every change.
//!
//! # Lifecycle
//!
//! ```text
//! start() ──▶ load `cache:version_history` (or seed with app version)
//!    │
//! set_version(v) ──▶ previous active → deprecated
//!    │               v → active (front of history)
//!    │               persist history
//!    └─────────────▶ fire hooks (detached, best effort)
//! ```

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::version::{extract_version, versioned_key, SchemaVersion};
use crate::cache::keys::{self, VERSION_HISTORY_KEY};
use crate::cache::CacheStore;
use crate::domain::ports::Clock;
use crate::error::{Error, Result};
use crate::task::spawn_detached;

// =============================================================================
// Version Records
// =============================================================================

/// Lifecycle of a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Active,
    Deprecated,
    Invalidated,
}

/// One entry of the version history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRecord {
    pub version: SchemaVersion,
    pub created_at: DateTime<Utc>,
    pub deployed_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub status: VersionStatus,
}

impl VersionRecord {
    fn activated(version: SchemaVersion, now: DateTime<Utc>) -> Self {
        Self {
            version,
            created_at: now,
            deployed_at: Some(now),
            invalidated_at: None,
            status: VersionStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == VersionStatus::Active
    }
}

/// Summary of the registry state.
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub current: SchemaVersion,
    pub app_version: SchemaVersion,
    pub started: bool,
    pub total_versions: usize,
    pub deprecated: usize,
    pub invalidated: usize,
    pub hooks: Vec<String>,
}

// =============================================================================
// Hooks
// =============================================================================

/// Callback fired with `(old, new)` after every version change.
pub type HookFn =
    Arc<dyn Fn(SchemaVersion, SchemaVersion) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Default)]
struct VersionState {
    started: bool,
    /// Most recent first
    history: Vec<VersionRecord>,
}

// =============================================================================
// Versioning
// =============================================================================

/// Schema version registry
pub struct Versioning {
    store: CacheStore,
    clock: Arc<dyn Clock>,
    app_version: SchemaVersion,
    state: RwLock<VersionState>,
    hooks: RwLock<Vec<(String, HookFn)>>,
}

impl Versioning {
    pub fn new(store: CacheStore, app_version: SchemaVersion, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            app_version,
            state: RwLock::new(VersionState::default()),
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Load the persisted history, seeding it with the application version
    /// when nothing usable is stored.
    pub fn start(&self) -> Result<()> {
        let loaded = match self.store.get(VERSION_HISTORY_KEY)? {
            Some(value) => match serde_json::from_value::<Vec<VersionRecord>>(value) {
                Ok(history) => history,
                Err(e) => {
                    warn!(error = %e, "Discarding unreadable version history");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let history = {
            let mut state = self.state.write();
            state.history = loaded;
            if !state.history.iter().any(VersionRecord::is_active) {
                let now = self.clock.now();
                state.history.retain(|r| r.version != self.app_version);
                state
                    .history
                    .insert(0, VersionRecord::activated(self.app_version, now));
            }
            state.started = true;
            state.history.clone()
        };

        self.persist(&history)?;
        info!(version = %self.current_version(), records = history.len(), "Versioning started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.state.read().started
    }

    pub fn app_version(&self) -> SchemaVersion {
        self.app_version
    }

    /// Active version, or the application version when none is active.
    pub fn current_version(&self) -> SchemaVersion {
        self.state
            .read()
            .history
            .iter()
            .find(|r| r.is_active())
            .map(|r| r.version)
            .unwrap_or(self.app_version)
    }

    /// Key for `base` under the active version.
    pub fn versioned_key(&self, base: &str) -> String {
        versioned_key(base, &self.current_version())
    }

    /// History, most recent first.
    pub fn get_version_history(&self) -> Vec<VersionRecord> {
        self.state.read().history.clone()
    }

    /// Make `version` the active version and fire hooks.
    ///
    /// Setting the version that is already active does nothing.
    pub fn set_version(&self, version: &str) -> Result<()> {
        self.set_version_skipping(version, &[])
    }

    /// `set_version`, without firing the hooks named in `skip`.
    #[instrument(skip(self))]
    pub fn set_version_skipping(&self, version: &str, skip: &[&str]) -> Result<()> {
        let new = SchemaVersion::parse(version)?;
        let now = self.clock.now();

        let (old, history) = {
            let mut state = self.state.write();
            let old = state
                .history
                .iter()
                .find(|r| r.is_active())
                .map(|r| r.version)
                .unwrap_or(self.app_version);
            if old == new && state.history.iter().any(|r| r.version == new && r.is_active()) {
                debug!(version = %new, "Version already active");
                return Ok(());
            }

            for record in state.history.iter_mut().filter(|r| r.is_active()) {
                record.status = VersionStatus::Deprecated;
            }

            let record = match state.history.iter().position(|r| r.version == new) {
                Some(idx) => {
                    let mut existing = state.history.remove(idx);
                    existing.status = VersionStatus::Active;
                    existing.deployed_at = Some(now);
                    existing.invalidated_at = None;
                    existing
                }
                None => VersionRecord::activated(new, now),
            };
            state.history.insert(0, record);
            (old, state.history.clone())
        };

        if let Err(e) = self.persist(&history) {
            warn!(error = %e, "Failed to persist version history");
        }
        info!(from = %old, to = %new, "Cache version changed");

        self.fire_hooks(old, new, skip);
        Ok(())
    }

    // =========================================================================
    // Hooks
    // =========================================================================

    /// Register (or replace) a named hook.
    pub fn register_hook<F, Fut>(&self, name: impl Into<String>, hook: F)
    where
        F: Fn(SchemaVersion, SchemaVersion) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let name = name.into();
        let hook: HookFn = Arc::new(move |old, new| hook(old, new).boxed());
        let mut hooks = self.hooks.write();
        match hooks.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = hook,
            None => hooks.push((name.clone(), hook)),
        }
        debug!(hook = %name, "Registered version hook");
    }

    /// Remove a hook; returns whether it existed.
    pub fn unregister_hook(&self, name: &str) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(n, _)| n != name);
        hooks.len() != before
    }

    /// Hook names in registration order.
    pub fn list_hooks(&self) -> Vec<String> {
        self.hooks.read().iter().map(|(n, _)| n.clone()).collect()
    }

    fn fire_hooks(&self, old: SchemaVersion, new: SchemaVersion, skip: &[&str]) {
        let hooks: Vec<(String, HookFn)> = self.hooks.read().clone();
        for (name, hook) in hooks {
            if skip.contains(&name.as_str()) {
                debug!(hook = %name, "Version hook skipped");
                continue;
            }
            spawn_detached(format!("version_hook:{}", name), async move {
                hook(old, new).await
            });
        }
    }

    // =========================================================================
    // Invalidation & Migration
    // =========================================================================

    /// Delete every versioned key whose version is not `keep` and mark those
    /// versions invalidated. Returns the number of deleted keys.
    #[instrument(skip(self), fields(keep = %keep))]
    pub fn invalidate_old_versions(&self, keep: &SchemaVersion) -> Result<usize> {
        let mut deleted = 0;
        for key in self.store.keys()? {
            let Ok((_, version)) = extract_version(&key) else {
                continue;
            };
            if version != *keep && self.store.delete(&key)? {
                deleted += 1;
            }
        }

        self.mark_invalidated(|r| r.version != *keep)?;
        info!(deleted, "Invalidated old cache versions");
        Ok(deleted)
    }

    /// Delete every key of one version. Returns the number of deleted keys.
    #[instrument(skip(self))]
    pub fn invalidate_version(&self, version: &str) -> Result<usize> {
        let target = SchemaVersion::parse(version)?;
        let mut deleted = 0;
        for key in self.store.keys()? {
            if matches!(extract_version(&key), Ok((_, v)) if v == target)
                && self.store.delete(&key)?
            {
                deleted += 1;
            }
        }

        self.mark_invalidated(|r| r.version == target)?;
        info!(deleted, "Invalidated cache version");
        Ok(deleted)
    }

    /// Re-tag entries of `from` as `to`, keeping their remaining TTL.
    ///
    /// With `patterns`, only base keys matching one of the `*` patterns move.
    #[instrument(skip(self, patterns))]
    pub fn migrate_version(
        &self,
        from: &str,
        to: &str,
        patterns: Option<&[String]>,
    ) -> Result<usize> {
        let from = SchemaVersion::parse(from)?;
        let to = SchemaVersion::parse(to)?;
        if from == to {
            return Ok(0);
        }

        let mut migrated = 0;
        for key in self.store.keys()? {
            let Ok((base, version)) = extract_version(&key) else {
                continue;
            };
            if version != from {
                continue;
            }
            if let Some(patterns) = patterns {
                if !patterns.iter().any(|p| keys::matches_pattern(p, &base)) {
                    continue;
                }
            }

            // Either may have expired since enumeration
            let (Some(value), Some(ttl)) = (self.store.get(&key)?, self.store.remaining_ttl(&key)?)
            else {
                continue;
            };
            self.store.set(&versioned_key(&base, &to), value, ttl)?;
            self.store.delete(&key)?;
            migrated += 1;
        }

        info!(%from, %to, migrated, "Migrated cache entries");
        Ok(migrated)
    }

    /// Drop records from the history. The active record is never removed.
    pub fn remove_records(&self, versions: &[SchemaVersion]) -> Result<()> {
        let drop: BTreeSet<_> = versions.iter().copied().collect();
        let history = {
            let mut state = self.state.write();
            state
                .history
                .retain(|r| r.is_active() || !drop.contains(&r.version));
            state.history.clone()
        };
        self.persist(&history)
    }

    pub fn version_info(&self) -> VersionInfo {
        let state = self.state.read();
        let count = |status| state.history.iter().filter(|r| r.status == status).count();
        VersionInfo {
            current: state
                .history
                .iter()
                .find(|r| r.is_active())
                .map(|r| r.version)
                .unwrap_or(self.app_version),
            app_version: self.app_version,
            started: state.started,
            total_versions: state.history.len(),
            deprecated: count(VersionStatus::Deprecated),
            invalidated: count(VersionStatus::Invalidated),
            hooks: self.list_hooks(),
        }
    }

    fn mark_invalidated(&self, select: impl Fn(&VersionRecord) -> bool) -> Result<()> {
        let now = self.clock.now();
        let history = {
            let mut state = self.state.write();
            for record in state.history.iter_mut() {
                if !record.is_active() && record.status != VersionStatus::Invalidated && select(record) {
                    record.status = VersionStatus::Invalidated;
                    record.invalidated_at = Some(now);
                }
            }
            state.history.clone()
        };
        self.persist(&history)
    }

    fn persist(&self, history: &[VersionRecord]) -> Result<()> {
        self.store
            .put(VERSION_HISTORY_KEY, serde_json::to_value(history)?)
            .map_err(|e| Error::Backend(format!("persisting version history: {}", e)))
    }
}

impl std::fmt::Debug for Versioning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Versioning")
            .field("current", &self.current_version())
            .field("app_version", &self.app_version)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
