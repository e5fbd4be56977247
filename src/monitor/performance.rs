//! Performance Monitor
//!
//! Samples the metrics collector on an interval, grades cache health against
//! four thresholds, raises alerts with a per-alert cooldown and derives
//! tuning recommendations.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::health::{Alert, AlertKind, HealthStatus, Recommendation};
use crate::config::MonitorSettings;
use crate::domain::ports::Clock;
use crate::metrics::{CacheMetrics, MetricsReport};

/// Fired alerts retained for inspection.
const ALERT_LOG_SIZE: usize = 50;

/// Consecutive strictly decreasing hit ratios that count as a trend.
const TREND_WINDOW: usize = 3;

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub alert_cooldown: Duration,
    pub history_size: usize,
    pub thresholds: Thresholds,
}

/// Health thresholds
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub min_hit_ratio: f64,
    pub max_avg_response_ms: f64,
    /// Fraction of backend capacity
    pub max_memory_usage: f64,
    pub max_evictions_per_minute: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&MonitorSettings::default())
    }
}

impl From<&MonitorSettings> for MonitorConfig {
    fn from(settings: &MonitorSettings) -> Self {
        Self {
            interval: Duration::from_secs(settings.interval_seconds.max(1)),
            alert_cooldown: Duration::from_secs(settings.alert_cooldown_seconds),
            history_size: settings.history_size.max(1),
            thresholds: Thresholds {
                min_hit_ratio: settings.min_hit_ratio,
                max_avg_response_ms: settings.max_avg_response_ms,
                max_memory_usage: settings.max_memory_usage,
                max_evictions_per_minute: settings.max_evictions_per_minute,
            },
        }
    }
}

/// One graded observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerformanceSample {
    pub taken_at: DateTime<Utc>,
    pub status: HealthStatus,
    pub hit_ratio: f64,
    pub reads: u64,
    pub avg_response_ms: f64,
    pub memory_usage: f64,
    pub evictions_per_minute: f64,
}

/// Result of one check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub sample: PerformanceSample,
    /// Alerts that fired on this check (cooldown permitting)
    pub fired: Vec<Alert>,
}

/// Snapshot for operators.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub status: HealthStatus,
    pub latest: Option<PerformanceSample>,
    pub active_alerts: Vec<Alert>,
    pub recommendations: Vec<Recommendation>,
    pub samples: usize,
}

/// Eviction count seen by the previous check.
#[derive(Debug, Clone, Copy)]
struct EvictionMark {
    window: DateTime<Utc>,
    at: DateTime<Utc>,
    count: u64,
}

#[derive(Default)]
struct MonitorState {
    status: Option<HealthStatus>,
    last_evictions: Option<EvictionMark>,
    history: VecDeque<PerformanceSample>,
    active: BTreeMap<AlertKind, Alert>,
    last_fired: BTreeMap<AlertKind, DateTime<Utc>>,
    alert_log: VecDeque<Alert>,
}

/// Severity when `value` exceeds `max`; critical at `max * critical_factor`.
fn grade_above(value: f64, max: f64, critical_factor: f64) -> Option<HealthStatus> {
    if value >= max * critical_factor {
        Some(HealthStatus::Critical)
    } else if value > max {
        Some(HealthStatus::Degraded)
    } else {
        None
    }
}

/// Evictions per minute since the previous check, floored at a one-minute
/// window. Falls back to the collector's average on the first check and
/// after a metrics reset.
fn eviction_rate(previous: Option<EvictionMark>, report: &MetricsReport) -> f64 {
    match previous {
        Some(mark) if mark.window == report.window_started && report.evictions >= mark.count => {
            let minutes =
                ((report.collected_at - mark.at).num_milliseconds() as f64 / 60_000.0).max(1.0);
            (report.evictions - mark.count) as f64 / minutes
        }
        _ => report.evictions_per_minute,
    }
}

fn grade_hit_ratio(ratio: f64, reads: u64, min: f64) -> Option<HealthStatus> {
    // Nothing to judge before the first read
    if reads == 0 {
        None
    } else if ratio < min * 0.8 {
        Some(HealthStatus::Critical)
    } else if ratio < min {
        Some(HealthStatus::Degraded)
    } else {
        None
    }
}

/// Cache performance monitor
pub struct PerformanceMonitor {
    config: MonitorConfig,
    metrics: Arc<CacheMetrics>,
    clock: Arc<dyn Clock>,
    state: Mutex<MonitorState>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig, metrics: Arc<CacheMetrics>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            metrics,
            clock,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Latest status; healthy before the first check.
    pub fn status(&self) -> HealthStatus {
        self.state.lock().status.unwrap_or(HealthStatus::Healthy)
    }

    /// Sample the metrics, grade them and raise alerts.
    #[instrument(skip(self))]
    pub fn check(&self) -> CheckResult {
        let report = self.metrics.get_metrics();
        let now = self.clock.now();
        let evictions_per_minute = {
            let mut state = self.state.lock();
            let rate = eviction_rate(state.last_evictions, &report);
            state.last_evictions = Some(EvictionMark {
                window: report.window_started,
                at: report.collected_at,
                count: report.evictions,
            });
            rate
        };
        let breaches = self.evaluate(&report, evictions_per_minute);

        let status = breaches
            .values()
            .map(|(severity, _, _)| *severity)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        let sample = PerformanceSample {
            taken_at: now,
            status,
            hit_ratio: report.hit_ratio,
            reads: report.reads(),
            avg_response_ms: report.average_operation_ms,
            memory_usage: report.memory_usage(),
            evictions_per_minute,
        };

        let cooldown = chrono::Duration::from_std(self.config.alert_cooldown)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let mut fired = Vec::new();

        let mut state = self.state.lock();
        for kind in [
            AlertKind::LowHitRatio,
            AlertKind::HighResponseTime,
            AlertKind::HighMemoryUsage,
            AlertKind::HighEvictionRate,
        ] {
            let Some((severity, value, threshold)) = breaches.get(&kind).copied() else {
                // Back under threshold: clear, next breach fires immediately
                if state.active.remove(&kind).is_some() {
                    info!(alert = kind.as_str(), "Cache alert cleared");
                }
                state.last_fired.remove(&kind);
                continue;
            };

            let alert = Alert {
                kind,
                severity,
                value,
                threshold,
                message: format!("{} at {:.3} (threshold {:.3})", kind.as_str(), value, threshold),
                raised_at: now,
            };

            let due = state
                .last_fired
                .get(&kind)
                .map_or(true, |last| now - *last >= cooldown);
            if due {
                match severity {
                    HealthStatus::Critical => error!(alert = kind.as_str(), value, threshold, "Cache alert"),
                    _ => warn!(alert = kind.as_str(), value, threshold, "Cache alert"),
                }
                state.last_fired.insert(kind, now);
                if state.alert_log.len() >= ALERT_LOG_SIZE {
                    state.alert_log.pop_front();
                }
                state.alert_log.push_back(alert.clone());
                fired.push(alert.clone());
            }
            state.active.insert(kind, alert);
        }

        if state.history.len() >= self.config.history_size {
            state.history.pop_front();
        }
        state.history.push_back(sample.clone());

        if state.status != Some(status) {
            info!(from = ?state.status, to = %status, "Cache health changed");
        }
        state.status = Some(status);

        CheckResult { sample, fired }
    }

    fn evaluate(
        &self,
        report: &MetricsReport,
        evictions_per_minute: f64,
    ) -> BTreeMap<AlertKind, (HealthStatus, f64, f64)> {
        let t = &self.config.thresholds;
        let checks = [
            (
                AlertKind::LowHitRatio,
                grade_hit_ratio(report.hit_ratio, report.reads(), t.min_hit_ratio),
                report.hit_ratio,
                t.min_hit_ratio,
            ),
            (
                AlertKind::HighResponseTime,
                grade_above(report.average_operation_ms, t.max_avg_response_ms, 2.0),
                report.average_operation_ms,
                t.max_avg_response_ms,
            ),
            (
                AlertKind::HighMemoryUsage,
                grade_above(report.memory_usage(), t.max_memory_usage, 1.2),
                report.memory_usage(),
                t.max_memory_usage,
            ),
            (
                AlertKind::HighEvictionRate,
                grade_above(evictions_per_minute, t.max_evictions_per_minute, 2.0),
                evictions_per_minute,
                t.max_evictions_per_minute,
            ),
        ];

        checks
            .into_iter()
            .filter_map(|(kind, grade, value, threshold)| {
                grade.map(|severity| (kind, (severity, value, threshold)))
            })
            .collect()
    }

    /// Whether the last samples show a strictly declining hit ratio.
    pub fn hit_ratio_declining(&self) -> bool {
        let state = self.state.lock();
        if state.history.len() < TREND_WINDOW {
            return false;
        }
        let recent: Vec<f64> = state
            .history
            .iter()
            .rev()
            .take(TREND_WINDOW)
            .map(|s| s.hit_ratio)
            .collect();
        // `recent` is newest first
        recent.windows(2).all(|w| w[0] < w[1])
    }

    /// Suggestions for the active alerts and the hit-ratio trend.
    pub fn recommendations(&self) -> Vec<Recommendation> {
        let active: Vec<AlertKind> = self.state.lock().active.keys().copied().collect();
        let mut out: Vec<Recommendation> = active
            .into_iter()
            .map(|kind| match kind {
                AlertKind::LowHitRatio => Recommendation::new(
                    "Hit ratio is below target",
                    &[
                        "Increase TTLs for frequently read domains",
                        "Add warming strategies for hot entities",
                    ],
                ),
                AlertKind::HighResponseTime => Recommendation::new(
                    "Cache operations are slow",
                    &["Check backend load", "Reduce the size of cached values"],
                ),
                AlertKind::HighMemoryUsage => Recommendation::new(
                    "Cache is close to capacity",
                    &["Raise max_capacity", "Shorten TTLs for bulky domains"],
                ),
                AlertKind::HighEvictionRate => Recommendation::new(
                    "Entries are evicted faster than expected",
                    &["Raise max_capacity", "Reduce warming volume"],
                ),
            })
            .collect();

        if self.hit_ratio_declining() {
            out.push(Recommendation::new(
                "Hit ratio has declined over the last samples",
                &[
                    "Review recent version changes for invalidations",
                    "Force startup warming",
                ],
            ));
        }
        out
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        self.state.lock().active.values().cloned().collect()
    }

    /// Alerts that actually fired, oldest first.
    pub fn alert_log(&self) -> Vec<Alert> {
        self.state.lock().alert_log.iter().cloned().collect()
    }

    pub fn history(&self) -> Vec<PerformanceSample> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn performance_report(&self) -> PerformanceReport {
        let (latest, samples) = {
            let state = self.state.lock();
            (state.history.back().cloned(), state.history.len())
        };
        PerformanceReport {
            status: self.status(),
            latest,
            active_alerts: self.active_alerts(),
            recommendations: self.recommendations(),
            samples,
        }
    }

    /// Check on every interval until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = interval(self.config.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval = ?self.config.interval, "Performance monitor started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Performance monitor shutting down");
                    break;
                }
                _ = tick.tick() => {
                    self.check();
                }
            }
        }
    }
}

impl std::fmt::Debug for PerformanceMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PerformanceMonitor")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
