//! Moka Cache Backend
//!
//! Production `CacheBackend` built on `moka::sync::Cache`: bounded capacity
//! with TinyLFU admission, per-entry expiry and eviction notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ::moka::notification::RemovalCause as MokaRemovalCause;
use ::moka::sync::Cache;
use ::moka::Expiry;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::domain::ports::{BackendStats, CacheBackend, RemovalCause, RemovalListener, Ttl};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct MokaEntry {
    value: Value,
    ttl: Ttl,
    expires_at: Instant,
}

/// Per-entry expiry: every write restarts the entry's own TTL.
struct EntryExpiry;

impl Expiry<String, MokaEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &MokaEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl.as_duration())
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &MokaEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl.as_duration())
    }
}

struct NamedCache {
    cache: Cache<String, MokaEntry>,
    evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

/// Moka-backed cache, one bounded instance per cache name.
pub struct MokaBackend {
    caches: DashMap<String, NamedCache>,
    max_capacity: u64,
    listener: Arc<RwLock<Option<RemovalListener>>>,
}

impl MokaBackend {
    /// Create a backend whose caches each hold at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Result<Self> {
        if max_capacity == 0 {
            return Err(Error::InvalidBackend(
                "moka backend requires max_capacity > 0".to_string(),
            ));
        }
        Ok(Self {
            caches: DashMap::new(),
            max_capacity,
            listener: Arc::new(RwLock::new(None)),
        })
    }

    fn build_cache(&self, name: &str) -> NamedCache {
        let evictions = Arc::new(AtomicU64::new(0));
        let expirations = Arc::new(AtomicU64::new(0));
        let listener = self.listener.clone();
        let cache_name = name.to_string();
        let (ev, ex) = (evictions.clone(), expirations.clone());

        let cache = Cache::builder()
            .max_capacity(self.max_capacity)
            .expire_after(EntryExpiry)
            .eviction_listener(move |key: Arc<String>, _value, cause| {
                let cause = match cause {
                    MokaRemovalCause::Expired => {
                        ex.fetch_add(1, Ordering::Relaxed);
                        RemovalCause::Expired
                    }
                    MokaRemovalCause::Size => {
                        ev.fetch_add(1, Ordering::Relaxed);
                        RemovalCause::Evicted
                    }
                    _ => return,
                };
                if let Some(listener) = listener.read().as_ref() {
                    listener(&cache_name, &key, cause);
                }
            })
            .build();

        debug!(cache = %name, capacity = self.max_capacity, "Created moka cache");

        NamedCache {
            cache,
            evictions,
            expirations,
        }
    }

    fn with_cache<T>(&self, name: &str, f: impl FnOnce(&NamedCache) -> T) -> T {
        if let Some(existing) = self.caches.get(name) {
            return f(&existing);
        }
        let entry = self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| self.build_cache(name));
        f(&entry)
    }
}

impl CacheBackend for MokaBackend {
    fn name(&self) -> &'static str {
        "moka"
    }

    fn get(&self, cache: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .caches
            .get(cache)
            .and_then(|named| named.cache.get(key))
            .map(|entry| entry.value))
    }

    fn contains(&self, cache: &str, key: &str) -> Result<bool> {
        // contains_key is not a read for the TinyLFU estimator
        Ok(self
            .caches
            .get(cache)
            .map(|named| named.cache.contains_key(key))
            .unwrap_or(false))
    }

    fn set(&self, cache: &str, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let expires_at = Instant::now()
            .checked_add(ttl.as_duration())
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(u32::MAX as u64));
        let entry = MokaEntry {
            value,
            ttl,
            expires_at,
        };
        self.with_cache(cache, |named| named.cache.insert(key.to_string(), entry));
        Ok(())
    }

    fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        Ok(self
            .caches
            .get(cache)
            .map(|named| named.cache.remove(key).is_some())
            .unwrap_or(false))
    }

    fn clear(&self, cache: &str) -> Result<()> {
        if let Some(named) = self.caches.get(cache) {
            named.cache.invalidate_all();
            named.cache.run_pending_tasks();
        }
        Ok(())
    }

    fn keys(&self, cache: &str) -> Result<Vec<String>> {
        Ok(self
            .caches
            .get(cache)
            .map(|named| named.cache.iter().map(|(k, _)| k.as_ref().clone()).collect())
            .unwrap_or_default())
    }

    fn remaining_ttl(&self, cache: &str, key: &str) -> Result<Option<Ttl>> {
        let entry = self.caches.get(cache).and_then(|named| named.cache.get(key));
        Ok(entry.map(|e| {
            if e.ttl.is_infinite() {
                Ttl::Infinity
            } else {
                let left = e.expires_at.saturating_duration_since(Instant::now());
                Ttl::Seconds(left.as_millis().div_ceil(1000) as u64)
            }
        }))
    }

    fn stats(&self, cache: &str) -> BackendStats {
        match self.caches.get(cache) {
            Some(named) => {
                named.cache.run_pending_tasks();
                BackendStats {
                    entries: named.cache.entry_count(),
                    capacity: self.max_capacity,
                    memory_bytes: 0,
                    evictions: named.evictions.load(Ordering::Relaxed),
                    expirations: named.expirations.load(Ordering::Relaxed),
                }
            }
            None => BackendStats {
                capacity: self.max_capacity,
                ..Default::default()
            },
        }
    }

    fn set_removal_listener(&self, listener: RemovalListener) {
        *self.listener.write() = Some(listener);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_zero_capacity_is_invalid_backend() {
        assert!(matches!(
            MokaBackend::new(0),
            Err(Error::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_set_get_delete() {
        let backend = MokaBackend::new(100).unwrap();
        backend
            .set("c", "esi:system:30000142", json!({"name": "Jita"}), Ttl::Infinity)
            .unwrap();
        assert_eq!(
            backend.get("c", "esi:system:30000142").unwrap(),
            Some(json!({"name": "Jita"}))
        );
        assert_eq!(
            backend.remaining_ttl("c", "esi:system:30000142").unwrap(),
            Some(Ttl::Infinity)
        );
        assert!(backend.delete("c", "esi:system:30000142").unwrap());
        assert_eq!(backend.get("c", "esi:system:30000142").unwrap(), None);
    }

    #[test]
    fn test_short_ttl_expires() {
        let backend = MokaBackend::new(100).unwrap();
        backend.set("c", "k:1", json!(1), Ttl::Seconds(0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.get("c", "k:1").unwrap(), None);
    }

    #[test]
    fn test_contains() {
        let backend = MokaBackend::new(100).unwrap();
        backend.set("c", "k:1", json!(1), Ttl::Seconds(60)).unwrap();
        backend.set("c", "k:2", json!(2), Ttl::Seconds(0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        assert!(backend.contains("c", "k:1").unwrap());
        assert!(!backend.contains("c", "k:2").unwrap());
        assert!(!backend.contains("c", "k:3").unwrap());
        assert!(!backend.contains("nope", "k:1").unwrap());
    }

    #[test]
    fn test_keys_and_clear() {
        let backend = MokaBackend::new(100).unwrap();
        backend.set("c", "k:1", json!(1), Ttl::Seconds(60)).unwrap();
        backend.set("c", "k:2", json!(2), Ttl::Seconds(60)).unwrap();

        let mut keys = backend.keys("c").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["k:1".to_string(), "k:2".to_string()]);

        backend.clear("c").unwrap();
        assert_eq!(backend.get("c", "k:1").unwrap(), None);
        assert_eq!(backend.stats("c").entries, 0);
    }

    #[test]
    fn test_unknown_cache_reads_as_miss() {
        let backend = MokaBackend::new(10).unwrap();
        assert_eq!(backend.get("nope", "k:1").unwrap(), None);
        assert!(!backend.delete("nope", "k:1").unwrap());
        assert_eq!(backend.stats("nope").entries, 0);
    }
}
