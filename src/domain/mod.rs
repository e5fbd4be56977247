//! Domain Layer
//!
//! Ports (trait abstractions over the backing cache, the enrichment service
//! and the clock), value objects shared by every component, and the telemetry
//! events the metrics pipeline consumes.
//!
//! # Usage
//!
//! ```ignore
//! use relay_cache::domain::ports::{CacheBackend, CacheDomain, Ttl};
//!
//! fn warm(backend: &dyn CacheBackend) -> relay_cache::Result<()> {
//!     backend.set("relay_cache", "esi:system:30000142", serde_json::json!({}), Ttl::Infinity)
//! }
//! ```

pub mod events;
pub mod ports;

pub use events::CacheEvent;
pub use ports::{
    fetch_entity, BackendStats, CacheBackend, CacheDomain, Clock, EnrichmentProvider,
    RemovalCause, RemovalListener, Ttl, INFINITE_TTL_SECS,
};
