//! Warming Strategies
//!
//! A strategy expands to the batch of entities worth having in cache right
//! now. Strategies are named and pluggable; the warmer runs each registered
//! strategy at startup, periodically, or both.

use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::job::WarmTarget;
use crate::cache::keys::RECENT_CHARACTERS_KEY;
use crate::cache::CacheFacade;
use crate::config::WarmerSettings;
use crate::domain::ports::CacheDomain;
use crate::error::Result;

/// When a strategy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmPhase {
    /// At startup and on forced warming, high priority
    Startup,
    /// On every interval tick, medium priority
    Periodic,
}

#[async_trait]
pub trait WarmingStrategy: Send + Sync {
    fn name(&self) -> &str;

    /// Entities to warm.
    async fn targets(&self, facade: &CacheFacade) -> Result<Vec<WarmTarget>>;
}

// =============================================================================
// Built-in Strategies
// =============================================================================

/// A fixed list of targets.
#[derive(Debug, Clone)]
pub struct StaticTargets {
    name: String,
    targets: Vec<WarmTarget>,
}

impl StaticTargets {
    pub fn new(name: impl Into<String>, targets: Vec<WarmTarget>) -> Self {
        Self {
            name: name.into(),
            targets,
        }
    }

    /// Configured priority systems.
    pub fn priority_systems(settings: &WarmerSettings) -> Self {
        Self::from_ids("priority_systems", CacheDomain::System, &settings.priority_systems)
    }

    /// Configured priority characters.
    pub fn priority_characters(settings: &WarmerSettings) -> Self {
        Self::from_ids(
            "priority_characters",
            CacheDomain::Character,
            &settings.priority_characters,
        )
    }

    fn from_ids(name: &str, domain: CacheDomain, ids: &[String]) -> Self {
        Self::new(
            name,
            ids.iter().map(|id| WarmTarget::new(domain, id.clone())).collect(),
        )
    }
}

#[async_trait]
impl WarmingStrategy for StaticTargets {
    fn name(&self) -> &str {
        &self.name
    }

    async fn targets(&self, _facade: &CacheFacade) -> Result<Vec<WarmTarget>> {
        Ok(self.targets.clone())
    }
}

/// Characters the relay recently saw, read from `tracking:recent_characters`.
///
/// The tracked value is a JSON array of ids (strings or numbers), most
/// recent first. Nothing tracked yet means nothing to warm.
#[derive(Debug, Clone)]
pub struct RecentActivity {
    limit: usize,
}

impl RecentActivity {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

#[async_trait]
impl WarmingStrategy for RecentActivity {
    fn name(&self) -> &str {
        "recent_activity"
    }

    async fn targets(&self, facade: &CacheFacade) -> Result<Vec<WarmTarget>> {
        let tracked = match facade.get(RECENT_CHARACTERS_KEY).await {
            Ok(value) => value,
            Err(e) if e.is_not_found() => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let ids = match tracked {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        Ok(ids
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .take(self.limit)
            .map(|id| WarmTarget::new(CacheDomain::Character, id))
            .collect())
    }
}

type TargetFn = Box<dyn Fn() -> BoxFuture<'static, Result<Vec<WarmTarget>>> + Send + Sync>;

/// Strategy backed by an async closure.
pub struct FnStrategy {
    name: String,
    f: TargetFn,
}

impl FnStrategy {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<WarmTarget>>> + Send + 'static,
    {
        Self {
            name: name.into(),
            f: Box::new(move || f().boxed()),
        }
    }
}

#[async_trait]
impl WarmingStrategy for FnStrategy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn targets(&self, _facade: &CacheFacade) -> Result<Vec<WarmTarget>> {
        (self.f)().await
    }
}
