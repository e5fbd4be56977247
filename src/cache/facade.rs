//! Cache Facade
//!
//! The API the relay talks to. Every key is versioned, every read reports a
//! hit or miss, every operation reports its timing, and transient backend
//! errors are retried with exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::domain_config::DomainConfig;
use super::keys;
use super::store::CacheStore;
use crate::config::RetrySettings;
use crate::domain::events::CacheEvent;
use crate::domain::ports::{CacheDomain, Ttl};
use crate::error::{Error, Result};
use crate::metrics::CacheMetrics;
use crate::versioning::Versioning;

/// Retry policy for transient backend errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetrySettings::default())
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: Duration::from_millis(settings.base_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
        }
    }
}

/// Domain tag and id used when reporting reads of a key.
struct ReadTag<'a> {
    domain: &'a str,
    id: &'a str,
}

/// Versioned, instrumented access to the cache.
pub struct CacheFacade {
    store: CacheStore,
    domains: DomainConfig,
    versioning: Arc<Versioning>,
    metrics: Arc<CacheMetrics>,
    retry: RetryPolicy,
}

impl CacheFacade {
    pub fn new(
        store: CacheStore,
        domains: DomainConfig,
        versioning: Arc<Versioning>,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        Self {
            store,
            domains,
            versioning,
            metrics,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn domain_config(&self) -> &DomainConfig {
        &self.domains
    }

    pub fn versioning(&self) -> &Arc<Versioning> {
        &self.versioning
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    // =========================================================================
    // Generic Operations
    // =========================================================================

    /// Read `key`; `Error::NotFound` when absent or expired.
    pub async fn get(&self, key: &str) -> Result<Value> {
        let tag = ReadTag {
            domain: CacheDomain::Generic.as_str(),
            id: key,
        };
        self.read(key, tag).await
    }

    /// Write `key` with an explicit TTL, or the generic default.
    pub async fn put(&self, key: &str, value: Value, ttl: Option<Ttl>) -> Result<()> {
        let ttl = self.domains.ttl_for(Some(CacheDomain::Generic), ttl);
        self.write(key, value, ttl).await
    }

    /// Remove `key`; returns whether it was present.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let started = Instant::now();
        let versioned = self.versioned(key)?;
        let result = self
            .with_retry("delete", &versioned, || self.store.delete(&versioned))
            .await;
        self.record_timing("delete", started);
        result.inspect_err(|e| warn!(key = %key, error = %e, "Cache delete failed"))
    }

    /// Whether `key` holds a live value. Backend errors count as absent.
    ///
    /// Neither a hit nor a miss, and not an access for the eviction policy.
    pub async fn exists(&self, key: &str) -> bool {
        let Ok(versioned) = self.versioned(key) else {
            return false;
        };
        match self
            .with_retry("exists", &versioned, || self.store.contains(&versioned))
            .await
        {
            Ok(found) => found,
            Err(e) => {
                debug!(key = %key, error = %e, "Treating failed lookup as absent");
                false
            }
        }
    }

    // =========================================================================
    // Entity Operations
    // =========================================================================

    /// Read an entity; `extra` carries the killmail hash.
    pub async fn get_entity(&self, domain: CacheDomain, id: &str, extra: Option<&str>) -> Result<Value> {
        let key = keys::entity_key(domain, id, extra);
        let tag = ReadTag {
            domain: domain.as_str(),
            id,
        };
        self.read(&key, tag).await
    }

    /// Write an entity under its domain TTL unless `ttl` overrides it.
    pub async fn put_entity(
        &self,
        domain: CacheDomain,
        id: &str,
        extra: Option<&str>,
        value: Value,
        ttl: Option<Ttl>,
    ) -> Result<()> {
        let key = keys::entity_key(domain, id, extra);
        let ttl = self.domains.ttl_for(Some(domain), ttl);
        self.write(&key, value, ttl).await
    }

    /// Whether an entity is cached, without counting a read.
    pub async fn contains_entity(&self, domain: CacheDomain, id: &str, extra: Option<&str>) -> bool {
        self.exists(&keys::entity_key(domain, id, extra)).await
    }

    pub async fn get_character(&self, id: &str) -> Result<Value> {
        self.get_entity(CacheDomain::Character, id, None).await
    }

    pub async fn put_character(&self, id: &str, value: Value) -> Result<()> {
        self.put_entity(CacheDomain::Character, id, None, value, None).await
    }

    pub async fn get_corporation(&self, id: &str) -> Result<Value> {
        self.get_entity(CacheDomain::Corporation, id, None).await
    }

    pub async fn put_corporation(&self, id: &str, value: Value) -> Result<()> {
        self.put_entity(CacheDomain::Corporation, id, None, value, None).await
    }

    pub async fn get_alliance(&self, id: &str) -> Result<Value> {
        self.get_entity(CacheDomain::Alliance, id, None).await
    }

    pub async fn put_alliance(&self, id: &str, value: Value) -> Result<()> {
        self.put_entity(CacheDomain::Alliance, id, None, value, None).await
    }

    pub async fn get_system(&self, id: &str) -> Result<Value> {
        self.get_entity(CacheDomain::System, id, None).await
    }

    pub async fn put_system(&self, id: &str, value: Value) -> Result<()> {
        self.put_entity(CacheDomain::System, id, None, value, None).await
    }

    pub async fn get_type(&self, id: &str) -> Result<Value> {
        self.get_entity(CacheDomain::Type, id, None).await
    }

    pub async fn put_type(&self, id: &str, value: Value) -> Result<()> {
        self.put_entity(CacheDomain::Type, id, None, value, None).await
    }

    pub async fn get_killmail(&self, id: &str, hash: &str) -> Result<Value> {
        self.get_entity(CacheDomain::Killmail, id, Some(hash)).await
    }

    pub async fn put_killmail(&self, id: &str, hash: &str, value: Value) -> Result<()> {
        self.put_entity(CacheDomain::Killmail, id, Some(hash), value, None)
            .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn versioned(&self, key: &str) -> Result<String> {
        if !keys::is_valid_key(key) {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.versioning.versioned_key(key))
    }

    async fn read(&self, key: &str, tag: ReadTag<'_>) -> Result<Value> {
        let started = Instant::now();
        let versioned = self.versioned(key)?;
        let result = self
            .with_retry("get", &versioned, || self.store.get(&versioned))
            .await;
        self.record_timing("get", started);

        match result {
            Ok(Some(value)) => {
                self.metrics.record(CacheEvent::hit(tag.domain, tag.id));
                Ok(value)
            }
            Ok(None) => {
                self.metrics.record(CacheEvent::miss(tag.domain, tag.id));
                Err(Error::NotFound(key.to_string()))
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Cache read failed");
                Err(e)
            }
        }
    }

    async fn write(&self, key: &str, value: Value, ttl: Ttl) -> Result<()> {
        let started = Instant::now();
        let versioned = self.versioned(key)?;
        let result = self
            .with_retry("put", &versioned, || {
                self.store.set(&versioned, value.clone(), ttl)
            })
            .await;
        self.record_timing("put", started);
        result.inspect_err(|e| warn!(key = %key, error = %e, "Cache write failed"))
    }

    async fn with_retry<T>(
        &self,
        operation: &str,
        key: &str,
        mut op: impl FnMut() -> Result<T>,
    ) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(operation, key, attempt, ?delay, error = %e, "Retrying cache operation");
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn record_timing(&self, operation: &str, started: Instant) {
        self.metrics
            .record(CacheEvent::operation(operation, started.elapsed()));
    }
}

impl std::fmt::Debug for CacheFacade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheFacade")
            .field("store", &self.store)
            .field("retry", &self.retry)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryBackend};
    use crate::domain::ports::{BackendStats, CacheBackend, RemovalListener};
    use crate::metrics::MetricsLimits;
    use crate::versioning::SchemaVersion;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn facade_over(backend: Arc<dyn CacheBackend>, clock: Arc<ManualClock>) -> CacheFacade {
        let store = CacheStore::new(backend, "relay_cache");
        let versioning = Arc::new(Versioning::new(
            store.clone(),
            SchemaVersion::new(1, 0, 0),
            clock.clone(),
        ));
        versioning.start().unwrap();
        let metrics = Arc::new(CacheMetrics::new(MetricsLimits::default(), clock));
        CacheFacade::new(store, DomainConfig::default(), versioning, metrics)
    }

    fn facade() -> (Arc<ManualClock>, CacheFacade) {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(MemoryBackend::new(clock.clone()));
        (clock.clone(), facade_over(backend, clock))
    }

    /// Fails with a transient error while its failure budget lasts.
    struct FlakyBackend {
        inner: MemoryBackend,
        failures: AtomicU32,
        calls: AtomicU32,
        reads: AtomicU32,
    }

    impl FlakyBackend {
        fn new(clock: Arc<ManualClock>, failures: u32) -> Self {
            Self {
                inner: MemoryBackend::new(clock),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
                reads: AtomicU32::new(0),
            }
        }

        fn trip(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let budget = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            match budget {
                Ok(_) => Err(Error::Backend("connection reset".into())),
                Err(_) => Ok(()),
            }
        }
    }

    impl CacheBackend for FlakyBackend {
        fn name(&self) -> &'static str {
            "flaky"
        }
        fn get(&self, cache: &str, key: &str) -> Result<Option<Value>> {
            self.trip()?;
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get(cache, key)
        }
        fn contains(&self, cache: &str, key: &str) -> Result<bool> {
            self.trip()?;
            self.inner.contains(cache, key)
        }
        fn set(&self, cache: &str, key: &str, value: Value, ttl: Ttl) -> Result<()> {
            self.trip()?;
            self.inner.set(cache, key, value, ttl)
        }
        fn delete(&self, cache: &str, key: &str) -> Result<bool> {
            self.inner.delete(cache, key)
        }
        fn clear(&self, cache: &str) -> Result<()> {
            self.inner.clear(cache)
        }
        fn keys(&self, cache: &str) -> Result<Vec<String>> {
            self.inner.keys(cache)
        }
        fn remaining_ttl(&self, cache: &str, key: &str) -> Result<Option<Ttl>> {
            self.inner.remaining_ttl(cache, key)
        }
        fn stats(&self, cache: &str) -> BackendStats {
            self.inner.stats(cache)
        }
        fn set_removal_listener(&self, listener: RemovalListener) {
            self.inner.set_removal_listener(listener)
        }
    }

    #[tokio::test]
    async fn test_killmail_roundtrip_uses_versioned_key() {
        let (_, facade) = facade();
        facade
            .put_killmail("1001", "abc", json!({"victim": 1}))
            .await
            .unwrap();

        assert_eq!(
            facade.get_killmail("1001", "abc").await.unwrap(),
            json!({"victim": 1})
        );
        assert!(facade
            .store()
            .get("esi:killmail:1001:abc:v1.0.0")
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_domain_ttl_applies() {
        let (clock, facade) = facade();
        facade.put_killmail("1", "h", json!({})).await.unwrap();
        facade.put_system("30000142", json!({})).await.unwrap();

        clock.advance(Duration::from_secs(3601));
        assert_matches!(facade.get_killmail("1", "h").await, Err(Error::NotFound(_)));
        assert!(facade.get_system("30000142").await.is_ok());
    }

    #[tokio::test]
    async fn test_reads_record_hits_and_misses() {
        let (_, facade) = facade();
        facade.put_character("7", json!({"name": "x"})).await.unwrap();
        facade.get_character("7").await.unwrap();
        let _ = facade.get_character("8").await;

        let report = facade.metrics().get_metrics();
        assert_eq!(report.hits, 1);
        assert_eq!(report.misses, 1);
        assert_eq!(report.domains["character"].hits, 1);
        assert!(report.operations.contains_key("put"));
        assert!(report.operations.contains_key("get"));
    }

    #[tokio::test]
    async fn test_invalid_key_rejected() {
        let (_, facade) = facade();
        assert_matches!(facade.get("nocolon").await, Err(Error::InvalidKey(_)));
        assert_matches!(
            facade.put("bad", json!(1), None).await,
            Err(Error::InvalidKey(_))
        );
        assert!(!facade.exists("bad").await);
    }

    #[tokio::test]
    async fn test_generic_operations() {
        let (clock, facade) = facade();
        facade
            .put("map:activity", json!([1]), Some(Ttl::Seconds(10)))
            .await
            .unwrap();
        assert!(facade.exists("map:activity").await);
        assert!(facade.delete("map:activity").await.unwrap());
        assert!(!facade.exists("map:activity").await);

        facade.put("map:activity", json!([2]), None).await.unwrap();
        clock.advance(Duration::from_secs(3599));
        assert!(facade.exists("map:activity").await);
        clock.advance(Duration::from_secs(2));
        assert!(!facade.exists("map:activity").await);
    }

    #[tokio::test]
    async fn test_exists_is_not_a_read() {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(FlakyBackend::new(clock.clone(), 0));
        let facade = facade_over(backend.clone(), clock.clone());
        facade.put_character("7", json!({})).await.unwrap();
        backend.reads.store(0, Ordering::SeqCst);

        assert!(facade.contains_entity(CacheDomain::Character, "7", None).await);
        assert!(!facade.exists("esi:character:8").await);
        clock.advance(Duration::from_secs(86_401));
        assert!(!facade.exists("esi:character:7").await);

        assert_eq!(backend.reads.load(Ordering::SeqCst), 0);
        let report = facade.metrics().get_metrics();
        assert_eq!(report.hits + report.misses, 0);
    }

    #[tokio::test]
    async fn test_version_change_hides_old_entries() {
        let (_, facade) = facade();
        facade.put_type("587", json!({"name": "Rifter"})).await.unwrap();
        facade.versioning().set_version("1.1.0").unwrap();

        assert_matches!(facade.get_type("587").await, Err(Error::NotFound(_)));
        assert!(facade.store().get("esi:type:587:v1.0.0").unwrap().is_some());
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(FlakyBackend::new(clock.clone(), 0));
        let facade = facade_over(backend.clone(), clock).with_retry_policy(fast_retry(3));

        backend.failures.store(2, Ordering::SeqCst);
        backend.calls.store(0, Ordering::SeqCst);
        facade.put_system("1", json!({})).await.unwrap();

        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert!(facade.get_system("1").await.is_ok());
    }

    #[tokio::test]
    async fn test_retries_give_up_after_max_attempts() {
        let clock = Arc::new(ManualClock::new());
        let backend = Arc::new(FlakyBackend::new(clock.clone(), 0));
        let facade = facade_over(backend.clone(), clock).with_retry_policy(fast_retry(2));

        backend.failures.store(u32::MAX, Ordering::SeqCst);
        backend.calls.store(0, Ordering::SeqCst);

        assert_matches!(facade.get_system("1").await, Err(Error::Backend(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        // Failures are not reads
        assert_eq!(facade.metrics().get_metrics().misses, 0);
        assert!(!facade.exists("esi:system:1").await);
    }

    #[test]
    fn test_retry_delay_is_bounded_exponential() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(150),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(50));
        assert_eq!(policy.delay_for(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for(3), Duration::from_millis(150));
        assert_eq!(policy.delay_for(30), Duration::from_millis(150));
    }
}
