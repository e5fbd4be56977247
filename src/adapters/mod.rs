//! Infrastructure Adapters
//!
//! Implementations of the domain ports plus the Prometheus exporter.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                              │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │                    Ports (Traits)                           │ │
//! │  │          CacheBackend │ Clock │ EnrichmentProvider          │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Adapters (This Module)                       │
//! │  ┌────────────────────────────────────────────────────────────┐ │
//! │  │  MokaBackend │ MemoryBackend │ SystemClock │ ManualClock   │ │
//! │  │  UnavailableEnrichment │ PrometheusExporter                │ │
//! │  └────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The backend is chosen once at startup from configuration and injected;
//! nothing re-dispatches on the backend name afterwards.

mod clock;
mod enrichment;
mod memory;
mod moka_backend;
mod prometheus;

use std::str::FromStr;
use std::sync::Arc;

pub use self::clock::{ManualClock, SystemClock};
pub use self::enrichment::UnavailableEnrichment;
pub use self::memory::MemoryBackend;
pub use self::moka_backend::MokaBackend;
pub use self::prometheus::PrometheusExporter;

use crate::config::CacheSettings;
use crate::domain::ports::{CacheBackend, Clock};
use crate::error::{Error, Result};

/// Closed set of backing cache implementations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Bounded production cache
    Moka,
    /// In-memory cache for tests and isolated runs
    Memory,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "moka" => Ok(BackendKind::Moka),
            "memory" | "in_memory" => Ok(BackendKind::Memory),
            other => Err(Error::UnknownAdapter(other.to_string())),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Moka => write!(f, "moka"),
            BackendKind::Memory => write!(f, "memory"),
        }
    }
}

/// Build the configured backend.
///
/// Unknown identifiers yield `Error::UnknownAdapter`; unusable parameters
/// yield `Error::InvalidBackend`.
pub fn build_backend(
    settings: &CacheSettings,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn CacheBackend>> {
    let kind: BackendKind = settings.backend.parse()?;
    if settings.max_capacity == 0 {
        return Err(Error::InvalidBackend(format!(
            "{} backend requires max_capacity > 0",
            kind
        )));
    }

    let backend: Arc<dyn CacheBackend> = match kind {
        BackendKind::Moka => Arc::new(MokaBackend::new(settings.max_capacity)?),
        BackendKind::Memory => {
            Arc::new(MemoryBackend::new(clock).with_max_entries(settings.max_capacity as usize))
        }
    };
    Ok(backend)
}
