//! Store Adapter
//!
//! Binds the injected backend to one cache instance so callers never pass
//! the cache name around.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::ports::{BackendStats, CacheBackend, Ttl};
use crate::error::Result;

/// A backend bound to a named cache.
#[derive(Clone)]
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    cache: String,
}

impl CacheStore {
    pub fn new(backend: Arc<dyn CacheBackend>, cache: impl Into<String>) -> Self {
        Self {
            backend,
            cache: cache.into(),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.backend.get(&self.cache, key)
    }

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.backend.contains(&self.cache, key)
    }

    pub fn set(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        self.backend.set(&self.cache, key, value, ttl)
    }

    /// Write without expiry.
    pub fn put(&self, key: &str, value: Value) -> Result<()> {
        self.set(key, value, Ttl::Infinity)
    }

    pub fn delete(&self, key: &str) -> Result<bool> {
        self.backend.delete(&self.cache, key)
    }

    pub fn clear(&self) -> Result<()> {
        self.backend.clear(&self.cache)
    }

    pub fn keys(&self) -> Result<Vec<String>> {
        self.backend.keys(&self.cache)
    }

    pub fn remaining_ttl(&self, key: &str) -> Result<Option<Ttl>> {
        self.backend.remaining_ttl(&self.cache, key)
    }

    pub fn stats(&self) -> BackendStats {
        self.backend.stats(&self.cache)
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend.name())
            .field("cache", &self.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryBackend};
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_put_never_expires() {
        let clock = Arc::new(ManualClock::new());
        let store = CacheStore::new(Arc::new(MemoryBackend::new(clock.clone())), "relay_cache");

        store.put("map:activity", json!([1, 2])).unwrap();
        store.set("esi:killmail:1:h", json!({}), Ttl::Seconds(1)).unwrap();
        clock.advance(Duration::from_secs(3600));

        assert_eq!(store.get("map:activity").unwrap(), Some(json!([1, 2])));
        assert_eq!(store.get("esi:killmail:1:h").unwrap(), None);
    }

    #[test]
    fn test_debug_shows_binding() {
        let store = CacheStore::new(
            Arc::new(MemoryBackend::new(Arc::new(ManualClock::new()))),
            "relay_cache_test",
        );
        let debug = format!("{:?}", store);
        assert!(debug.contains("memory"));
        assert!(debug.contains("relay_cache_test"));
    }
}
