//! Configuration
//!
//! Settings for every component, loaded from an optional YAML file. Each
//! section has defaults so an empty file (or no file) yields a working
//! configuration; the binary overrides a few fields from CLI flags / env.
//!
//! ```yaml
//! cache:
//!   backend: moka
//!   max_capacity: 200000
//! ttl:
//!   default_seconds: 3600
//!   domains:
//!     killmail: 7200
//!     system: infinity
//! warmer:
//!   max_concurrent_jobs: 8
//!   priority_systems: ["30000142"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::adapters::BackendKind;
use crate::domain::ports::{CacheDomain, Ttl};
use crate::error::{Error, Result};
use crate::versioning::SchemaVersion;

/// Global TTL applied when neither an override nor a domain default exists.
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Top-level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub cache: CacheSettings,
    pub ttl: TtlSettings,
    pub retry: RetrySettings,
    pub metrics: MetricsSettings,
    pub monitor: MonitorSettings,
    pub warmer: WarmerSettings,
    pub version: VersionSettings,
}

/// Backing cache selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Backend identifier: "moka" or "memory"
    pub backend: String,
    /// Cache instance name
    pub name: String,
    /// Use the isolated (test) instance name
    pub isolated: bool,
    /// Maximum entries per cache instance
    pub max_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: "moka".to_string(),
            name: "relay_cache".to_string(),
            isolated: false,
            max_capacity: 100_000,
        }
    }
}

/// A TTL as written in configuration: seconds, or "infinity"/"never".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TtlSetting {
    Seconds(u64),
    Keyword(String),
}

impl TtlSetting {
    pub fn to_ttl(&self) -> Result<Ttl> {
        match self {
            TtlSetting::Seconds(secs) => Ok(Ttl::Seconds(*secs)),
            TtlSetting::Keyword(word) => match word.to_lowercase().as_str() {
                "infinity" | "never" => Ok(Ttl::Infinity),
                other => Err(Error::Config(format!("invalid ttl '{}'", other))),
            },
        }
    }
}

/// TTL policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlSettings {
    pub default_seconds: u64,
    /// Per-domain overrides of the built-in table
    pub domains: BTreeMap<String, TtlSetting>,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            default_seconds: DEFAULT_TTL_SECS,
            domains: BTreeMap::new(),
        }
    }
}

impl TtlSettings {
    /// Parse the per-domain overrides.
    pub fn domain_overrides(&self) -> Result<BTreeMap<CacheDomain, Ttl>> {
        self.domains
            .iter()
            .map(|(name, setting)| Ok((name.parse::<CacheDomain>()?, setting.to_ttl()?)))
            .collect()
    }
}

/// Facade retry policy for transient backend errors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 50,
            max_delay_ms: 1000,
        }
    }
}

/// Metrics cardinality caps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub max_tracked_domains: usize,
    pub max_tracked_operations: usize,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            max_tracked_domains: 64,
            max_tracked_operations: 32,
        }
    }
}

/// Performance monitor thresholds and cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    pub interval_seconds: u64,
    pub alert_cooldown_seconds: u64,
    pub history_size: usize,
    pub min_hit_ratio: f64,
    pub max_avg_response_ms: f64,
    pub max_memory_usage: f64,
    pub max_evictions_per_minute: f64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            alert_cooldown_seconds: 300,
            history_size: 10,
            min_hit_ratio: 0.8,
            max_avg_response_ms: 50.0,
            max_memory_usage: 0.85,
            max_evictions_per_minute: 100.0,
        }
    }
}

/// Warmer concurrency, timeouts and strategy inputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmerSettings {
    pub enabled: bool,
    pub max_concurrent_jobs: usize,
    pub job_timeout_seconds: u64,
    pub queue_size_limit: usize,
    pub interval_seconds: u64,
    pub startup_delay_seconds: u64,
    pub max_retries: u32,
    pub history_size: usize,
    /// Systems warmed by the built-in "priority_systems" strategy
    pub priority_systems: Vec<String>,
    /// Characters warmed by the built-in "priority_characters" strategy
    pub priority_characters: Vec<String>,
    /// How many recently active characters to warm each cycle
    pub recent_characters_limit: usize,
}

impl Default for WarmerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_jobs: 5,
            job_timeout_seconds: 30,
            queue_size_limit: 1000,
            interval_seconds: 300,
            startup_delay_seconds: 5,
            max_retries: 0,
            history_size: 100,
            priority_systems: Vec::new(),
            priority_characters: Vec::new(),
            recent_characters_limit: 50,
        }
    }
}

/// Schema version settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionSettings {
    /// Version used before versioning has started or when none is persisted
    pub app_version: String,
    /// Register a hook that drops entries of other versions on every change
    pub invalidate_on_change: bool,
}

impl Default for VersionSettings {
    fn default() -> Self {
        Self {
            app_version: "1.0.0".to_string(),
            invalidate_on_change: false,
        }
    }
}

impl Settings {
    /// Parse settings from YAML text.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: Settings = serde_yaml::from_str(yaml)?;
        Ok(settings)
    }

    /// Load settings from a YAML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Reject configurations that cannot serve.
    pub fn validate(&self) -> Result<()> {
        self.cache.backend.parse::<BackendKind>()?;
        if self.cache.max_capacity == 0 {
            return Err(Error::InvalidBackend("max_capacity must be > 0".into()));
        }
        self.ttl.domain_overrides()?;
        SchemaVersion::parse(&self.version.app_version)
            .map_err(|_| Error::Config(format!("invalid app_version '{}'", self.version.app_version)))?;

        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.monitor.min_hit_ratio) {
            return Err(Error::Config("monitor.min_hit_ratio must be within 0..=1".into()));
        }
        if self.monitor.history_size == 0 {
            return Err(Error::Config("monitor.history_size must be >= 1".into()));
        }
        if self.warmer.max_concurrent_jobs == 0 || self.warmer.queue_size_limit == 0 {
            return Err(Error::Config(
                "warmer.max_concurrent_jobs and warmer.queue_size_limit must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor.interval_seconds)
    }
}
