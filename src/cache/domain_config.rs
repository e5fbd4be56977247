//! Per-Domain Cache Configuration
//!
//! Resolves the cache instance name and the TTL of every write.

use std::collections::BTreeMap;

use crate::config::{CacheSettings, TtlSettings};
use crate::domain::ports::{CacheDomain, Ttl};
use crate::error::Result;

const HOUR: u64 = 60 * 60;

/// Suffix appended to the cache name in isolated mode.
const ISOLATED_SUFFIX: &str = "_test";

/// Which cache instance the process talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheMode {
    #[default]
    Shared,
    /// Separate instance for tests and dry runs
    Isolated,
}

/// Built-in TTL of a domain, before configuration overrides.
pub fn default_domain_ttl(domain: CacheDomain, global: Ttl) -> Ttl {
    match domain {
        CacheDomain::Character | CacheDomain::Corporation | CacheDomain::Alliance => {
            Ttl::Seconds(24 * HOUR)
        }
        // Static universe data
        CacheDomain::System | CacheDomain::Type => Ttl::Infinity,
        CacheDomain::Killmail => Ttl::Seconds(HOUR),
        CacheDomain::Map => Ttl::Seconds(5 * 60),
        CacheDomain::Generic => global,
    }
}

/// Cache naming and TTL policy.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainConfig {
    name: String,
    mode: CacheMode,
    default_ttl: Ttl,
    table: BTreeMap<CacheDomain, Ttl>,
}

impl DomainConfig {
    /// Built-in table with the given cache name and global default.
    pub fn new(name: impl Into<String>, default_ttl: Ttl) -> Self {
        let table = CacheDomain::ALL
            .iter()
            .map(|d| (*d, default_domain_ttl(*d, default_ttl)))
            .collect();
        Self {
            name: name.into(),
            mode: CacheMode::Shared,
            default_ttl,
            table,
        }
    }

    /// Build from settings, applying per-domain overrides.
    pub fn from_settings(cache: &CacheSettings, ttl: &TtlSettings) -> Result<Self> {
        let mut config = Self::new(cache.name.clone(), Ttl::Seconds(ttl.default_seconds));
        if cache.isolated {
            config.mode = CacheMode::Isolated;
        }
        for (domain, value) in ttl.domain_overrides()? {
            config.table.insert(domain, value);
        }
        Ok(config)
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_domain_ttl(mut self, domain: CacheDomain, ttl: Ttl) -> Self {
        self.table.insert(domain, ttl);
        self
    }

    pub fn mode(&self) -> CacheMode {
        self.mode
    }

    pub fn default_ttl(&self) -> Ttl {
        self.default_ttl
    }

    /// Cache identifier for the configured mode.
    pub fn cache_name(&self) -> String {
        self.cache_name_for(self.mode)
    }

    /// Cache identifier for an explicit mode.
    pub fn cache_name_for(&self, mode: CacheMode) -> String {
        match mode {
            CacheMode::Shared => self.name.clone(),
            CacheMode::Isolated => format!("{}{}", self.name, ISOLATED_SUFFIX),
        }
    }

    /// TTL for a write: explicit override, then domain table, then global default.
    pub fn ttl_for(&self, domain: Option<CacheDomain>, override_ttl: Option<Ttl>) -> Ttl {
        override_ttl
            .or_else(|| domain.and_then(|d| self.table.get(&d).copied()))
            .unwrap_or(self.default_ttl)
    }
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self::new("relay_cache", Ttl::Seconds(crate::config::DEFAULT_TTL_SECS))
    }
}
