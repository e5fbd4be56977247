//! Versioning module
//!
//! Schema-versioned cache keys, the version registry with its deployment
//! hooks, and the deployment pipeline built on top of them.

mod manager;
mod registry;
mod version;

pub use manager::{
    CleanupReport, DeploymentReport, DeploymentStatus, DeploymentStep, DeploymentStrategy,
    StepOutcome, StepStatus, VersionManager,
};
pub use registry::{HookFn, VersionInfo, VersionRecord, VersionStatus, Versioning};
pub use version::{
    compare_versions, compatible_versions, extract_version, versioned_key, SchemaVersion,
    VERSION_SEPARATOR,
};
