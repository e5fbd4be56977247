//! Domain Events
//!
//! Telemetry events the facade and backends emit and the metrics component
//! accumulates.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cache telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CacheEvent {
    /// A read was served from cache.
    Hit { domain: String, id: String },

    /// A read found nothing (absent or expired).
    Miss { domain: String, id: String },

    /// An operation completed in `duration`.
    Operation { operation: String, duration: Duration },

    /// The backend evicted an entry for capacity.
    Eviction { key: String },

    /// The backend dropped an expired entry.
    Expiration { key: String },
}

impl CacheEvent {
    pub fn hit(domain: impl Into<String>, id: impl Into<String>) -> Self {
        CacheEvent::Hit {
            domain: domain.into(),
            id: id.into(),
        }
    }

    pub fn miss(domain: impl Into<String>, id: impl Into<String>) -> Self {
        CacheEvent::Miss {
            domain: domain.into(),
            id: id.into(),
        }
    }

    pub fn operation(operation: impl Into<String>, duration: Duration) -> Self {
        CacheEvent::Operation {
            operation: operation.into(),
            duration,
        }
    }

    /// Get the event type name.
    pub fn event_type(&self) -> &'static str {
        match self {
            CacheEvent::Hit { .. } => "hit",
            CacheEvent::Miss { .. } => "miss",
            CacheEvent::Operation { .. } => "operation",
            CacheEvent::Eviction { .. } => "eviction",
            CacheEvent::Expiration { .. } => "expiration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type() {
        assert_eq!(CacheEvent::hit("character", "1").event_type(), "hit");
        assert_eq!(CacheEvent::miss("system", "2").event_type(), "miss");
        assert_eq!(
            CacheEvent::operation("put", Duration::from_millis(3)).event_type(),
            "operation"
        );
    }

    #[test]
    fn test_serialization_is_tagged() {
        let json = serde_json::to_string(&CacheEvent::hit("killmail", "1001")).unwrap();
        assert!(json.contains("\"type\":\"Hit\""));
        assert!(json.contains("killmail"));
    }
}
