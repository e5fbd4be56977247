//! In-Memory Cache Backend
//!
//! `CacheBackend` over nested `DashMap`s with clock-driven expiry and an
//! optional per-cache entry cap. Used by tests and isolated runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::ports::{
    BackendStats, CacheBackend, Clock, RemovalCause, RemovalListener, Ttl,
};
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredEntry {
    value: Value,
    ttl: Ttl,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl StoredEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// In-memory backend for tests and isolated runs.
/// Uses DashMap for lock-free concurrent access instead of a single RwLock.
pub struct MemoryBackend {
    /// Storage (cache name -> key -> entry)
    storage: DashMap<String, DashMap<String, StoredEntry>>,
    clock: Arc<dyn Clock>,
    /// Per-cache entry cap, oldest entry evicted first
    max_entries: Option<usize>,
    listener: RwLock<Option<RemovalListener>>,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl MemoryBackend {
    /// Create an unbounded backend driven by `clock`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            storage: DashMap::new(),
            clock,
            max_entries: None,
            listener: RwLock::new(None),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Cap every cache at `max_entries`.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    fn notify(&self, cache: &str, key: &str, cause: RemovalCause) {
        match cause {
            RemovalCause::Evicted => self.evictions.fetch_add(1, Ordering::Relaxed),
            RemovalCause::Expired => self.expirations.fetch_add(1, Ordering::Relaxed),
        };
        if let Some(listener) = self.listener.read().as_ref() {
            listener(cache, key, cause);
        }
    }

    fn expires_at(now: DateTime<Utc>, ttl: Ttl) -> DateTime<Utc> {
        i64::try_from(ttl.as_duration().as_secs())
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Evict the oldest entry when inserting `key` would exceed the cap.
    fn make_room(&self, cache: &str, bucket: &DashMap<String, StoredEntry>, key: &str) {
        let Some(max) = self.max_entries else {
            return;
        };
        if bucket.contains_key(key) || bucket.len() < max {
            return;
        }

        let oldest = bucket
            .iter()
            .min_by_key(|e| e.value().inserted_at)
            .map(|e| e.key().clone());

        if let Some(victim) = oldest {
            if bucket.remove(&victim).is_some() {
                self.notify(cache, &victim, RemovalCause::Evicted);
            }
        }
    }
}

impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, cache: &str, key: &str) -> Result<Option<Value>> {
        let now = self.clock.now();
        let Some(bucket) = self.storage.get(cache) else {
            return Ok(None);
        };

        match bucket.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }

        // Expired: the read is a miss and the entry goes away
        if bucket.remove_if(key, |_, e| e.is_expired(now)).is_some() {
            self.notify(cache, key, RemovalCause::Expired);
        }
        Ok(None)
    }

    fn contains(&self, cache: &str, key: &str) -> Result<bool> {
        let now = self.clock.now();
        Ok(self
            .storage
            .get(cache)
            .and_then(|bucket| bucket.get(key).map(|entry| !entry.is_expired(now)))
            .unwrap_or(false))
    }

    fn set(&self, cache: &str, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let now = self.clock.now();
        let bucket = self
            .storage
            .entry(cache.to_string())
            .or_insert_with(DashMap::new);

        self.make_room(cache, &bucket, key);

        bucket.insert(
            key.to_string(),
            StoredEntry {
                value,
                ttl,
                inserted_at: now,
                expires_at: Self::expires_at(now, ttl),
            },
        );
        Ok(())
    }

    fn delete(&self, cache: &str, key: &str) -> Result<bool> {
        Ok(self
            .storage
            .get(cache)
            .map(|bucket| bucket.remove(key).is_some())
            .unwrap_or(false))
    }

    fn clear(&self, cache: &str) -> Result<()> {
        if let Some(bucket) = self.storage.get(cache) {
            bucket.clear();
        }
        Ok(())
    }

    fn keys(&self, cache: &str) -> Result<Vec<String>> {
        let now = self.clock.now();
        Ok(self
            .storage
            .get(cache)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|e| !e.value().is_expired(now))
                    .map(|e| e.key().clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn remaining_ttl(&self, cache: &str, key: &str) -> Result<Option<Ttl>> {
        let now = self.clock.now();
        let Some(bucket) = self.storage.get(cache) else {
            return Ok(None);
        };
        let remaining = bucket.get(key).and_then(|entry| {
            if entry.is_expired(now) {
                None
            } else if entry.ttl.is_infinite() {
                Some(Ttl::Infinity)
            } else {
                let left = (entry.expires_at - now).num_milliseconds().max(0) as u64;
                Some(Ttl::Seconds(left.div_ceil(1000)))
            }
        });
        Ok(remaining)
    }

    fn stats(&self, cache: &str) -> BackendStats {
        let (entries, memory_bytes) = self
            .storage
            .get(cache)
            .map(|bucket| {
                let bytes = bucket
                    .iter()
                    .map(|e| (e.key().len() + e.value().value.to_string().len()) as u64)
                    .sum();
                (bucket.len() as u64, bytes)
            })
            .unwrap_or((0, 0));

        BackendStats {
            entries,
            capacity: self.max_entries.unwrap_or(0) as u64,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }

    fn set_removal_listener(&self, listener: RemovalListener) {
        *self.listener.write() = Some(listener);
    }
}

// =============================================================================
// Tests
// =============================================================================
