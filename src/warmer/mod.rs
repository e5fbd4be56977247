//! Warmer module
//!
//! Populates the cache ahead of demand: named strategies expand into
//! warming jobs, and a bounded worker pool fetches each missing entity from
//! the enrichment service and writes it through the facade.

mod engine;
mod job;
mod strategy;

pub use engine::{CacheWarmer, WarmerConfig, WarmerStats};
pub use job::{JobOutcome, JobPriority, JobQueue, JobStatus, WarmTarget, WarmingJob};
pub use strategy::{FnStrategy, RecentActivity, StaticTargets, WarmPhase, WarmingStrategy};
