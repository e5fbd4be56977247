//! Cache Health Monitoring
//!
//! Periodic grading of the metrics snapshot into a health status, alerts
//! with cooldown and tuning recommendations.

mod health;
mod performance;

pub use health::{Alert, AlertKind, HealthStatus, Recommendation};
pub use performance::{
    CheckResult, MonitorConfig, PerformanceMonitor, PerformanceReport, PerformanceSample,
    Thresholds,
};
