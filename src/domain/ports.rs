//! Domain Ports (Port/Adapter Pattern)
//!
//! Core abstractions the cache core depends on. Infrastructure adapters in
//! [`crate::adapters`] implement them; the host application implements
//! [`EnrichmentProvider`] with its third-party API clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Domain Layer                            │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                    Ports (Traits)                    │    │
//! │  │   CacheBackend │ EnrichmentProvider │ Clock          │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Infrastructure Layer                       │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  Adapters (Impls)                    │    │
//! │  │  MokaBackend │ MemoryBackend │ SystemClock          │    │
//! │  └─────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

// =============================================================================
// Value Objects
// =============================================================================

/// Seconds used to represent a TTL that never expires (one century).
pub const INFINITE_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Time-to-live for a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ttl {
    /// Expire after the given number of seconds
    Seconds(u64),
    /// Never expire
    Infinity,
}

impl Ttl {
    /// Create a TTL from a duration (sub-second precision is dropped).
    pub fn from_duration(duration: Duration) -> Self {
        Ttl::Seconds(duration.as_secs())
    }

    /// Concrete duration handed to the backing store.
    ///
    /// `Infinity` maps to a century so backends without true infinite TTLs
    /// can still store it. Longer finite TTLs are capped at the same century.
    pub fn as_duration(&self) -> Duration {
        match self {
            Ttl::Seconds(secs) => Duration::from_secs((*secs).min(INFINITE_TTL_SECS)),
            Ttl::Infinity => Duration::from_secs(INFINITE_TTL_SECS),
        }
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Ttl::Infinity)
    }
}

impl std::fmt::Display for Ttl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ttl::Seconds(secs) => write!(f, "{}s", secs),
            Ttl::Infinity => write!(f, "infinity"),
        }
    }
}

/// Logical category of cached entity. Each has its own default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheDomain {
    Character,
    Corporation,
    Alliance,
    System,
    Type,
    Killmail,
    Map,
    Generic,
}

impl CacheDomain {
    /// All domains, in a stable order.
    pub const ALL: [CacheDomain; 8] = [
        CacheDomain::Character,
        CacheDomain::Corporation,
        CacheDomain::Alliance,
        CacheDomain::System,
        CacheDomain::Type,
        CacheDomain::Killmail,
        CacheDomain::Map,
        CacheDomain::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CacheDomain::Character => "character",
            CacheDomain::Corporation => "corporation",
            CacheDomain::Alliance => "alliance",
            CacheDomain::System => "system",
            CacheDomain::Type => "type",
            CacheDomain::Killmail => "killmail",
            CacheDomain::Map => "map",
            CacheDomain::Generic => "generic",
        }
    }

    /// Whether the warmer can populate this domain from the enrichment service.
    pub fn is_warmable(&self) -> bool {
        !matches!(self, CacheDomain::Map | CacheDomain::Generic)
    }
}

impl std::fmt::Display for CacheDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheDomain {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        CacheDomain::ALL
            .iter()
            .copied()
            .find(|d| d.as_str() == s)
            .ok_or_else(|| Error::Config(format!("unknown cache domain '{}'", s)))
    }
}

// =============================================================================
// Clock Port
// =============================================================================

/// Source of wall-clock time.
///
/// Injected wherever expiry or cooldowns are computed so tests can advance
/// time instead of sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

// =============================================================================
// Cache Backend Port
// =============================================================================

/// Why an entry left the backing store on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Removed to make room (capacity policy)
    Evicted,
    /// Removed because its TTL elapsed
    Expired,
}

/// Callback invoked with `(cache, key, cause)` for backend-initiated removals.
pub type RemovalListener = Arc<dyn Fn(&str, &str, RemovalCause) + Send + Sync>;

/// Backend statistics for a named cache. Zero where the backend cannot tell.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackendStats {
    /// Live entries
    pub entries: u64,
    /// Configured entry capacity (0 = unbounded / unknown)
    pub capacity: u64,
    /// Approximate bytes held
    pub memory_bytes: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Entries removed on expiry
    pub expirations: u64,
}

impl BackendStats {
    /// Fraction of capacity in use, 0.0 if capacity is unknown.
    pub fn usage_fraction(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.entries as f64 / self.capacity as f64
        }
    }
}

/// Port for the backing key/value cache.
///
/// All operations are synchronous and keyed by a cache instance name plus an
/// opaque string key. Implementations must be safe to share across threads;
/// concurrent writes to one key are last-writer-wins.
pub trait CacheBackend: Send + Sync {
    /// Adapter identifier (e.g. "moka", "memory").
    fn name(&self) -> &'static str;

    /// Read a value; expired entries read as `None` and are removed.
    fn get(&self, cache: &str, key: &str) -> Result<Option<Value>>;

    /// Whether a live value exists. Not a read: the eviction policy's
    /// access history is left untouched.
    fn contains(&self, cache: &str, key: &str) -> Result<bool>;

    /// Write a value with a TTL.
    fn set(&self, cache: &str, key: &str, value: Value, ttl: Ttl) -> Result<()>;

    /// Remove a key; returns whether it was present.
    fn delete(&self, cache: &str, key: &str) -> Result<bool>;

    /// Remove every key in the cache.
    fn clear(&self, cache: &str) -> Result<()>;

    /// Enumerate live keys in the cache.
    fn keys(&self, cache: &str) -> Result<Vec<String>>;

    /// Remaining lifetime of a live key.
    fn remaining_ttl(&self, cache: &str, key: &str) -> Result<Option<Ttl>>;

    /// Statistics for the cache.
    fn stats(&self, cache: &str) -> BackendStats;

    /// Install the callback for evictions and expirations.
    fn set_removal_listener(&self, listener: RemovalListener);
}

// =============================================================================
// Enrichment Port
// =============================================================================

/// Port for the enrichment service that fetches entities from upstream APIs.
///
/// Used exclusively by the warmer to populate missing entries.
#[async_trait]
pub trait EnrichmentProvider: Send + Sync {
    async fn fetch_character(&self, id: &str) -> Result<Value>;

    async fn fetch_corporation(&self, id: &str) -> Result<Value>;

    async fn fetch_alliance(&self, id: &str) -> Result<Value>;

    async fn fetch_system(&self, id: &str) -> Result<Value>;

    async fn fetch_type(&self, id: &str) -> Result<Value>;

    async fn fetch_killmail(&self, id: &str, hash: &str) -> Result<Value>;
}

/// Route a fetch for `domain` to the matching provider method.
pub async fn fetch_entity(
    provider: &dyn EnrichmentProvider,
    domain: CacheDomain,
    id: &str,
    extra: Option<&str>,
) -> Result<Value> {
    match domain {
        CacheDomain::Character => provider.fetch_character(id).await,
        CacheDomain::Corporation => provider.fetch_corporation(id).await,
        CacheDomain::Alliance => provider.fetch_alliance(id).await,
        CacheDomain::System => provider.fetch_system(id).await,
        CacheDomain::Type => provider.fetch_type(id).await,
        CacheDomain::Killmail => {
            let hash = extra.ok_or_else(|| Error::Enrichment {
                entity: format!("killmail:{}", id),
                reason: "killmail fetch requires a hash".to_string(),
            })?;
            provider.fetch_killmail(id, hash).await
        }
        CacheDomain::Map | CacheDomain::Generic => Err(Error::Enrichment {
            entity: format!("{}:{}", domain, id),
            reason: "domain has no enrichment source".to_string(),
        }),
    }
}
