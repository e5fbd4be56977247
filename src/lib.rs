//! Relay Cache - Caching Core for the Killfeed Notification Relay
//!
//! A TTL cache of enriched killmail, character, corporation, alliance, system
//! and type data, with deployment-safe schema versioning, background warming
//! and health monitoring.
//!
//! # Architecture
//!
//! ```text
//! CacheFacade ──▶ CacheStore ──▶ CacheBackend (moka | memory)
//!     │   │
//!     │   └──▶ CacheMetrics ◀── PerformanceMonitor
//!     └──▶ Versioning ◀── VersionManager
//!                │
//!                └── hooks ──▶ CacheWarmer ──▶ EnrichmentProvider
//! ```
//!
//! # Modules
//!
//! - [`adapters`] - Backend, clock, enrichment and Prometheus adapters
//! - [`cache`] - Keys, per-domain TTL policy, store and facade
//! - [`config`] - YAML settings
//! - [`core`] - Wiring of every component from settings
//! - [`domain`] - Ports and telemetry events (DDD)
//! - [`error`] - Error types
//! - [`metrics`] - Hit/miss and timing accumulators
//! - [`monitor`] - Health grading, alerts and recommendations
//! - [`versioning`] - Schema versions, registry and deployments
//! - [`warmer`] - Warming strategies, job queue and worker pool

pub mod adapters;
pub mod cache;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod task;
pub mod versioning;
pub mod warmer;

// Re-export commonly used types
pub use crate::cache::{CacheFacade, CacheStore, DomainConfig};
pub use crate::config::Settings;
pub use crate::core::CacheCore;
pub use crate::domain::ports::{CacheDomain, EnrichmentProvider, Ttl};
pub use crate::error::{Error, Result};
pub use crate::metrics::CacheMetrics;
pub use crate::monitor::{HealthStatus, PerformanceMonitor};
pub use crate::versioning::{SchemaVersion, VersionManager, Versioning};
pub use crate::warmer::CacheWarmer;
