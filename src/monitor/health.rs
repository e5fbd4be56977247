//! Health Status and Alerts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cache health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// All thresholds met
    Healthy,
    /// At least one threshold breached
    Degraded,
    /// At least one threshold breached by a wide margin
    Critical,
}

impl HealthStatus {
    /// Check if status is healthy or degraded (still serving)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }

    /// Check if status is healthy
    pub fn is_healthy(&self) -> bool {
        *self == HealthStatus::Healthy
    }

    /// Numeric form for gauges: 0 healthy, 1 degraded, 2 critical.
    pub fn as_gauge(&self) -> i64 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Critical => 2,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Critical => write!(f, "critical"),
        }
    }
}

/// The threshold an alert is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LowHitRatio,
    HighResponseTime,
    HighMemoryUsage,
    HighEvictionRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::LowHitRatio => "low_hit_ratio",
            AlertKind::HighResponseTime => "high_response_time",
            AlertKind::HighMemoryUsage => "high_memory_usage",
            AlertKind::HighEvictionRate => "high_eviction_rate",
        }
    }
}

/// A threshold breach.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub kind: AlertKind,
    /// Degraded or Critical
    pub severity: HealthStatus,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Advisory tuning suggestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub description: String,
    pub actions: Vec<String>,
}

impl Recommendation {
    pub fn new(description: impl Into<String>, actions: &[&str]) -> Self {
        Self {
            description: description.into(),
            actions: actions.iter().map(|a| a.to_string()).collect(),
        }
    }
}
