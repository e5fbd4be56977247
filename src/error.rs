//! Error types for the relay cache core

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Key absent or expired. A normal outcome, never logged as an error.
    #[error("Key not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Startup Misconfiguration
    // =========================================================================
    /// Backend identifier not recognised
    #[error("Unknown cache adapter: {0}")]
    UnknownAdapter(String),

    /// Backend recognised but its parameters are unusable
    #[error("Invalid cache backend configuration: {0}")]
    InvalidBackend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // =========================================================================
    // Caller Errors
    // =========================================================================
    /// Version string is not MAJOR.MINOR.PATCH
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Key is malformed or carries no version suffix
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Deployment strategy is not one of safe, aggressive, gradual
    #[error("Invalid deployment strategy: {0}")]
    InvalidStrategy(String),

    // =========================================================================
    // Deployment Errors
    // =========================================================================
    /// Requested version equals the active one
    #[error("Version {0} is already active")]
    SameVersion(String),

    /// Requested version is lower than the active one
    #[error("Version downgrade from {current} to {requested} is not allowed")]
    VersionDowngrade { current: String, requested: String },

    /// Major versions differ and the strategy cannot handle it
    #[error("Version {requested} is incompatible with {current}: {reason}")]
    IncompatibleVersion {
        current: String,
        requested: String,
        reason: String,
    },

    /// Rollback requested without a previous record
    #[error("No previous version to roll back to")]
    NoPreviousVersion,

    /// A deployment pipeline step failed
    #[error("Deployment step '{step}' failed: {reason}")]
    DeploymentFailed { step: String, reason: String },

    // =========================================================================
    // Warming Errors
    // =========================================================================
    /// Warming queue is at capacity
    #[error("Warming queue full ({limit} jobs in flight)")]
    QueueFull { limit: usize },

    /// Job exceeded its time budget
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Upstream enrichment fetch failed
    #[error("Enrichment failed for {entity}: {reason}")]
    Enrichment { entity: String, reason: String },

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// Transient backing store failure, retried by the facade
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Value could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a retry may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Backend(_))
    }

    /// Whether this is the expected miss outcome
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Short snake_case name of the error class
    pub fn kind(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::UnknownAdapter(_) => "unknown_adapter",
            Error::InvalidBackend(_) => "invalid_backend",
            Error::Config(_) => "config",
            Error::InvalidVersion(_) => "invalid_version",
            Error::InvalidKey(_) => "invalid_key",
            Error::InvalidStrategy(_) => "invalid_strategy",
            Error::SameVersion(_) => "same_version",
            Error::VersionDowngrade { .. } => "version_downgrade",
            Error::IncompatibleVersion { .. } => "incompatible_version",
            Error::NoPreviousVersion => "no_previous_version",
            Error::DeploymentFailed { .. } => "deployment_failed",
            Error::QueueFull { .. } => "queue_full",
            Error::Timeout(_) => "timeout",
            Error::Enrichment { .. } => "enrichment_failed",
            Error::Backend(_) => "backend",
            Error::Serialization(_) => "serialization",
            Error::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Error::Config(e.to_string())
    }
}
