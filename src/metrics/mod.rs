//! Metrics module
//!
//! Collects cache telemetry events and reports hit ratios, timings and
//! backend usage.

mod collector;

pub use collector::{CacheMetrics, DomainSummary, MetricsLimits, MetricsReport, OperationSummary};
