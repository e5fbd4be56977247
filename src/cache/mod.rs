//! Cache module
//!
//! Key construction, per-domain TTL policy, the store adapter bound to one
//! cache instance, and the facade the relay reads and writes through.
//!
//! ```text
//! CacheFacade ──▶ Versioning::versioned_key ──▶ CacheStore ──▶ CacheBackend
//!      │
//!      └────────▶ CacheMetrics (hit/miss, timings)
//! ```

mod domain_config;
mod facade;
pub mod keys;
mod store;

pub use domain_config::{default_domain_ttl, CacheMode, DomainConfig};
pub use facade::{CacheFacade, RetryPolicy};
pub use store::CacheStore;
