//! Cache Metrics Collection
//!
//! Accumulates hit/miss, timing and removal events and turns them into a
//! report on demand. Recording never fails and never blocks on the backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::cache::CacheStore;
use crate::config::MetricsSettings;
use crate::domain::events::CacheEvent;
use crate::domain::ports::{BackendStats, Clock};

/// Cardinality caps for the keyed accumulators.
#[derive(Debug, Clone, Copy)]
pub struct MetricsLimits {
    pub max_tracked_domains: usize,
    pub max_tracked_operations: usize,
}

impl Default for MetricsLimits {
    fn default() -> Self {
        Self {
            max_tracked_domains: 64,
            max_tracked_operations: 32,
        }
    }
}

impl From<&MetricsSettings> for MetricsLimits {
    fn from(settings: &MetricsSettings) -> Self {
        Self {
            max_tracked_domains: settings.max_tracked_domains,
            max_tracked_operations: settings.max_tracked_operations,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct DomainCounters {
    hits: u64,
    misses: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct OperationTotals {
    total: Duration,
    count: u64,
}

#[derive(Debug)]
struct MetricsState {
    hits: u64,
    misses: u64,
    domains: HashMap<String, DomainCounters>,
    operations: HashMap<String, OperationTotals>,
    evictions: u64,
    expirations: u64,
    since: DateTime<Utc>,
}

impl MetricsState {
    fn new(since: DateTime<Utc>) -> Self {
        Self {
            hits: 0,
            misses: 0,
            domains: HashMap::new(),
            operations: HashMap::new(),
            evictions: 0,
            expirations: 0,
            since,
        }
    }
}

/// Insert-or-update that drops unseen keys once `cap` is reached.
fn capped_entry<'a, V: Default>(
    map: &'a mut HashMap<String, V>,
    key: &str,
    cap: usize,
) -> Option<&'a mut V> {
    if !map.contains_key(key) {
        if map.len() >= cap {
            return None;
        }
        map.insert(key.to_string(), V::default());
    }
    map.get_mut(key)
}

fn ratio(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64
    }
}

/// Per-domain read counts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainSummary {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Per-operation timing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationSummary {
    pub count: u64,
    pub average_ms: f64,
}

/// Snapshot of cache health numbers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsReport {
    pub hits: u64,
    pub misses: u64,
    /// hits / (hits + misses), 0.0 before any read
    pub hit_ratio: f64,
    pub miss_ratio: f64,
    pub total_operations: u64,
    pub average_operation_ms: f64,
    pub operations: BTreeMap<String, OperationSummary>,
    pub domains: BTreeMap<String, DomainSummary>,
    pub evictions: u64,
    pub expirations: u64,
    /// Average since the last reset
    pub evictions_per_minute: f64,
    pub backend: BackendStats,
    /// Start of the accumulation window (construction or last reset)
    pub window_started: DateTime<Utc>,
    pub collected_at: DateTime<Utc>,
}

impl MetricsReport {
    pub fn reads(&self) -> u64 {
        self.hits + self.misses
    }

    /// Fraction of backend capacity in use.
    pub fn memory_usage(&self) -> f64 {
        self.backend.usage_fraction()
    }
}

/// Metrics collector
pub struct CacheMetrics {
    limits: MetricsLimits,
    clock: Arc<dyn Clock>,
    state: Mutex<MetricsState>,
    store: RwLock<Option<CacheStore>>,
}

impl CacheMetrics {
    pub fn new(limits: MetricsLimits, clock: Arc<dyn Clock>) -> Self {
        let since = clock.now();
        Self {
            limits,
            clock,
            state: Mutex::new(MetricsState::new(since)),
            store: RwLock::new(None),
        }
    }

    /// Source backend statistics from `store`.
    pub fn attach_store(&self, store: CacheStore) {
        *self.store.write() = Some(store);
    }

    /// Accumulate one event.
    pub fn record(&self, event: CacheEvent) {
        let mut state = self.state.lock();
        match event {
            CacheEvent::Hit { domain, .. } => {
                state.hits += 1;
                let cap = self.limits.max_tracked_domains;
                if let Some(c) = capped_entry(&mut state.domains, &domain, cap) {
                    c.hits += 1;
                }
            }
            CacheEvent::Miss { domain, .. } => {
                state.misses += 1;
                let cap = self.limits.max_tracked_domains;
                if let Some(c) = capped_entry(&mut state.domains, &domain, cap) {
                    c.misses += 1;
                }
            }
            CacheEvent::Operation {
                operation,
                duration,
            } => {
                let cap = self.limits.max_tracked_operations;
                match capped_entry(&mut state.operations, &operation, cap) {
                    Some(totals) => {
                        totals.total += duration;
                        totals.count += 1;
                    }
                    None => debug!(operation = %operation, "Operation metrics cap reached"),
                }
            }
            CacheEvent::Eviction { .. } => state.evictions += 1,
            CacheEvent::Expiration { .. } => state.expirations += 1,
        }
    }

    /// Build a report from the accumulators and the attached store.
    pub fn get_metrics(&self) -> MetricsReport {
        let now = self.clock.now();
        let backend = self
            .store
            .read()
            .as_ref()
            .map(CacheStore::stats)
            .unwrap_or_default();

        let state = self.state.lock();
        let reads = state.hits + state.misses;

        let (total_time, total_operations) = state
            .operations
            .values()
            .fold((Duration::ZERO, 0u64), |(t, c), o| (t + o.total, c + o.count));

        let operations = state
            .operations
            .iter()
            .map(|(name, o)| {
                (
                    name.clone(),
                    OperationSummary {
                        count: o.count,
                        average_ms: average_ms(o.total, o.count),
                    },
                )
            })
            .collect();

        let domains = state
            .domains
            .iter()
            .map(|(name, c)| {
                (
                    name.clone(),
                    DomainSummary {
                        hits: c.hits,
                        misses: c.misses,
                        hit_ratio: ratio(c.hits, c.hits + c.misses),
                    },
                )
            })
            .collect();

        // At least one minute so a fresh window does not extrapolate a spike
        let minutes = ((now - state.since).num_milliseconds() as f64 / 60_000.0).max(1.0);

        MetricsReport {
            hits: state.hits,
            misses: state.misses,
            hit_ratio: ratio(state.hits, reads),
            miss_ratio: ratio(state.misses, reads),
            total_operations,
            average_operation_ms: average_ms(total_time, total_operations),
            operations,
            domains,
            evictions: state.evictions,
            expirations: state.expirations,
            evictions_per_minute: state.evictions as f64 / minutes,
            backend,
            window_started: state.since,
            collected_at: now,
        }
    }

    /// Zero every accumulator.
    pub fn reset_metrics(&self) {
        let now = self.clock.now();
        *self.state.lock() = MetricsState::new(now);
        info!("Cache metrics reset");
    }
}

fn average_ms(total: Duration, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total.as_secs_f64() * 1000.0 / count as f64
    }
}

impl std::fmt::Debug for CacheMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheMetrics")
            .field("limits", &self.limits)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{ManualClock, MemoryBackend};
    use crate::domain::ports::Ttl;
    use serde_json::json;

    fn metrics() -> (Arc<ManualClock>, CacheMetrics) {
        let clock = Arc::new(ManualClock::new());
        (clock.clone(), CacheMetrics::new(MetricsLimits::default(), clock))
    }

    #[test]
    fn test_empty_ratio_is_zero() {
        let (_, metrics) = metrics();
        let report = metrics.get_metrics();
        assert_eq!(report.hit_ratio, 0.0);
        assert_eq!(report.miss_ratio, 0.0);
        assert_eq!(report.average_operation_ms, 0.0);
        assert_eq!(report.backend, BackendStats::default());
    }

    #[test]
    fn test_hit_ratio_and_domains() {
        let (_, metrics) = metrics();
        for _ in 0..3 {
            metrics.record(CacheEvent::hit("character", "1"));
        }
        metrics.record(CacheEvent::miss("killmail", "2"));

        let report = metrics.get_metrics();
        assert_eq!(report.hits, 3);
        assert_eq!(report.misses, 1);
        assert!((report.hit_ratio - 0.75).abs() < 1e-9);
        assert_eq!(report.domains["character"].hits, 3);
        assert_eq!(report.domains["killmail"].hit_ratio, 0.0);
    }

    #[test]
    fn test_operation_averages() {
        let (_, metrics) = metrics();
        metrics.record(CacheEvent::operation("get", Duration::from_millis(2)));
        metrics.record(CacheEvent::operation("get", Duration::from_millis(4)));
        metrics.record(CacheEvent::operation("put", Duration::from_millis(9)));

        let report = metrics.get_metrics();
        assert_eq!(report.total_operations, 3);
        assert!((report.operations["get"].average_ms - 3.0).abs() < 1e-9);
        assert!((report.average_operation_ms - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_cardinality_caps_drop_new_keys() {
        let clock = Arc::new(ManualClock::new());
        let limits = MetricsLimits {
            max_tracked_domains: 2,
            max_tracked_operations: 1,
        };
        let metrics = CacheMetrics::new(limits, clock);

        for domain in ["a", "b", "c"] {
            metrics.record(CacheEvent::hit(domain, "1"));
        }
        metrics.record(CacheEvent::hit("a", "2"));
        metrics.record(CacheEvent::operation("get", Duration::from_millis(1)));
        metrics.record(CacheEvent::operation("put", Duration::from_millis(1)));

        let report = metrics.get_metrics();
        assert_eq!(report.domains.len(), 2);
        assert_eq!(report.domains["a"].hits, 2);
        assert!(!report.domains.contains_key("c"));
        // Global counters still see every read
        assert_eq!(report.hits, 4);
        assert_eq!(report.operations.len(), 1);
    }

    #[test]
    fn test_eviction_rate_per_minute() {
        let (clock, metrics) = metrics();
        for i in 0..30 {
            metrics.record(CacheEvent::Eviction {
                key: format!("k:{}", i),
            });
        }
        metrics.record(CacheEvent::Expiration { key: "k:x".into() });

        // Under a minute counts as one minute
        assert_eq!(metrics.get_metrics().evictions_per_minute, 30.0);

        clock.advance(Duration::from_secs(180));
        let report = metrics.get_metrics();
        assert!((report.evictions_per_minute - 10.0).abs() < 1e-9);
        assert_eq!(report.expirations, 1);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let (_, metrics) = metrics();
        metrics.record(CacheEvent::hit("system", "1"));
        metrics.record(CacheEvent::operation("get", Duration::from_millis(1)));
        metrics.reset_metrics();

        let report = metrics.get_metrics();
        assert_eq!(report.hits, 0);
        assert_eq!(report.hit_ratio, 0.0);
        assert!(report.domains.is_empty());
        assert!(report.operations.is_empty());
    }

    #[test]
    fn test_backend_stats_from_attached_store() {
        let (clock, metrics) = metrics();
        let store = CacheStore::new(Arc::new(MemoryBackend::new(clock)), "relay_cache");
        store.set("esi:system:1", json!({}), Ttl::Infinity).unwrap();
        metrics.attach_store(store);

        assert_eq!(metrics.get_metrics().backend.entries, 1);
    }
}
