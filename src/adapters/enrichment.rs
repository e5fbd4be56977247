//! Enrichment Adapters

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::ports::EnrichmentProvider;
use crate::error::{Error, Result};

/// Provider for hosts that have no enrichment service wired in.
///
/// Every fetch fails, so warming only ever completes for entries that are
/// already cached.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEnrichment;

impl UnavailableEnrichment {
    fn unavailable(entity: String) -> Error {
        Error::Enrichment {
            entity,
            reason: "no enrichment service configured".to_string(),
        }
    }
}

#[async_trait]
impl EnrichmentProvider for UnavailableEnrichment {
    async fn fetch_character(&self, id: &str) -> Result<Value> {
        Err(Self::unavailable(format!("character:{}", id)))
    }

    async fn fetch_corporation(&self, id: &str) -> Result<Value> {
        Err(Self::unavailable(format!("corporation:{}", id)))
    }

    async fn fetch_alliance(&self, id: &str) -> Result<Value> {
        Err(Self::unavailable(format!("alliance:{}", id)))
    }

    async fn fetch_system(&self, id: &str) -> Result<Value> {
        Err(Self::unavailable(format!("system:{}", id)))
    }

    async fn fetch_type(&self, id: &str) -> Result<Value> {
        Err(Self::unavailable(format!("type:{}", id)))
    }

    async fn fetch_killmail(&self, id: &str, hash: &str) -> Result<Value> {
        Err(Self::unavailable(format!("killmail:{}:{}", id, hash)))
    }
}
