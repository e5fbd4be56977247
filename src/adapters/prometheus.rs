//! Prometheus Exporter
//!
//! Mirrors the metrics snapshot, warmer counters and health status into a
//! private Prometheus registry for the `/metrics` endpoint.

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::error::{Error, Result};
use crate::metrics::MetricsReport;
use crate::monitor::HealthStatus;
use crate::warmer::WarmerStats;

const NAMESPACE: &str = "relay_cache";

fn prom_err(e: prometheus::Error) -> Error {
    Error::Internal(format!("prometheus: {}", e))
}

/// Exporter with its own registry
pub struct PrometheusExporter {
    registry: Registry,
    hit_ratio: Gauge,
    operations: IntGauge,
    domain_hits: IntGaugeVec,
    domain_misses: IntGaugeVec,
    operation_avg_ms: GaugeVec,
    evictions: IntGauge,
    expirations: IntGauge,
    entries: IntGauge,
    memory_usage: Gauge,
    warmer_pending: IntGauge,
    warmer_running: IntGauge,
    warmer_failed: IntGauge,
    health_status: IntGauge,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).namespace(NAMESPACE);

        let hit_ratio = Gauge::with_opts(opts("hit_ratio", "Cache hit ratio since last reset"))
            .map_err(prom_err)?;
        let operations = IntGauge::with_opts(opts("operations", "Timed cache operations"))
            .map_err(prom_err)?;
        let domain_hits = IntGaugeVec::new(opts("domain_hits", "Hits per entity domain"), &["domain"])
            .map_err(prom_err)?;
        let domain_misses =
            IntGaugeVec::new(opts("domain_misses", "Misses per entity domain"), &["domain"])
                .map_err(prom_err)?;
        let operation_avg_ms = GaugeVec::new(
            opts("operation_avg_ms", "Average operation time in milliseconds"),
            &["operation"],
        )
        .map_err(prom_err)?;
        let evictions = IntGauge::with_opts(opts("evictions", "Capacity evictions"))
            .map_err(prom_err)?;
        let expirations = IntGauge::with_opts(opts("expirations", "TTL expirations"))
            .map_err(prom_err)?;
        let entries = IntGauge::with_opts(opts("entries", "Entries in the backing store"))
            .map_err(prom_err)?;
        let memory_usage = Gauge::with_opts(opts("memory_usage", "Fraction of capacity in use"))
            .map_err(prom_err)?;
        let warmer_pending = IntGauge::with_opts(opts("warmer_pending", "Queued warming jobs"))
            .map_err(prom_err)?;
        let warmer_running = IntGauge::with_opts(opts("warmer_running", "Running warming jobs"))
            .map_err(prom_err)?;
        let warmer_failed = IntGauge::with_opts(opts("warmer_failed", "Failed warming jobs"))
            .map_err(prom_err)?;
        let health_status = IntGauge::with_opts(opts(
            "health_status",
            "Cache health: 0 healthy, 1 degraded, 2 critical",
        ))
        .map_err(prom_err)?;

        registry.register(Box::new(hit_ratio.clone())).map_err(prom_err)?;
        registry.register(Box::new(operations.clone())).map_err(prom_err)?;
        registry.register(Box::new(domain_hits.clone())).map_err(prom_err)?;
        registry.register(Box::new(domain_misses.clone())).map_err(prom_err)?;
        registry.register(Box::new(operation_avg_ms.clone())).map_err(prom_err)?;
        registry.register(Box::new(evictions.clone())).map_err(prom_err)?;
        registry.register(Box::new(expirations.clone())).map_err(prom_err)?;
        registry.register(Box::new(entries.clone())).map_err(prom_err)?;
        registry.register(Box::new(memory_usage.clone())).map_err(prom_err)?;
        registry.register(Box::new(warmer_pending.clone())).map_err(prom_err)?;
        registry.register(Box::new(warmer_running.clone())).map_err(prom_err)?;
        registry.register(Box::new(warmer_failed.clone())).map_err(prom_err)?;
        registry.register(Box::new(health_status.clone())).map_err(prom_err)?;

        Ok(Self {
            registry,
            hit_ratio,
            operations,
            domain_hits,
            domain_misses,
            operation_avg_ms,
            evictions,
            expirations,
            entries,
            memory_usage,
            warmer_pending,
            warmer_running,
            warmer_failed,
            health_status,
        })
    }

    /// Copy the latest snapshots into the gauges.
    pub fn update(
        &self,
        report: &MetricsReport,
        warmer: Option<&WarmerStats>,
        health: Option<HealthStatus>,
    ) {
        self.hit_ratio.set(report.hit_ratio);
        self.operations.set(report.total_operations as i64);
        self.evictions.set(report.evictions as i64);
        self.expirations.set(report.expirations as i64);
        self.entries.set(report.backend.entries as i64);
        self.memory_usage.set(report.memory_usage());

        // Domains and operations disappear on reset
        self.domain_hits.reset();
        self.domain_misses.reset();
        for (domain, summary) in &report.domains {
            self.domain_hits
                .with_label_values(&[domain.as_str()])
                .set(summary.hits as i64);
            self.domain_misses
                .with_label_values(&[domain.as_str()])
                .set(summary.misses as i64);
        }
        self.operation_avg_ms.reset();
        for (operation, summary) in &report.operations {
            self.operation_avg_ms
                .with_label_values(&[operation.as_str()])
                .set(summary.average_ms);
        }

        if let Some(stats) = warmer {
            self.warmer_pending.set(stats.pending as i64);
            self.warmer_running.set(stats.running as i64);
            self.warmer_failed.set(stats.failed as i64);
        }
        if let Some(status) = health {
            self.health_status.set(status.as_gauge());
        }
    }

    /// Text exposition format.
    pub fn encode(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(prom_err)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(e.to_string()))
    }

    pub fn content_type(&self) -> String {
        TextEncoder::new().format_type().to_string()
    }
}

impl std::fmt::Debug for PrometheusExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusExporter").finish_non_exhaustive()
    }
}
