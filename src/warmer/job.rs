//! Warming Jobs and the Priority Queue

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::ports::CacheDomain;

/// Job priority. Higher drains first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// The entity a job warms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WarmTarget {
    pub domain: CacheDomain,
    pub id: String,
    /// Killmail hash
    pub extra: Option<String>,
}

impl WarmTarget {
    pub fn new(domain: CacheDomain, id: impl Into<String>) -> Self {
        Self {
            domain,
            id: id.into(),
            extra: None,
        }
    }

    pub fn killmail(id: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            domain: CacheDomain::Killmail,
            id: id.into(),
            extra: Some(hash.into()),
        }
    }
}

impl std::fmt::Display for WarmTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.extra {
            Some(extra) => write!(f, "{}:{}:{}", self.domain, self.id, extra),
            None => write!(f, "{}:{}", self.domain, self.id),
        }
    }
}

/// How a completed job got its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Entry was already cached; no upstream call
    AlreadyCached,
    /// Fetched from the enrichment service and written
    Fetched,
}

/// A unit of warming work.
#[derive(Debug, Clone, Serialize)]
pub struct WarmingJob {
    pub id: Uuid,
    pub target: WarmTarget,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<JobOutcome>,
    pub error: Option<String>,
    /// Execution attempts so far
    pub attempts: u32,
}

impl WarmingJob {
    pub fn new(target: WarmTarget, priority: JobPriority, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target,
            priority,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            outcome: None,
            error: None,
            attempts: 0,
        }
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
        self.attempts += 1;
    }

    pub(crate) fn complete(&mut self, outcome: JobOutcome, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.outcome = Some(outcome);
        self.error = None;
        self.completed_at = Some(now);
    }

    pub(crate) fn fail(&mut self, reason: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.error = Some(reason);
        self.completed_at = Some(now);
    }

    /// Back to pending for another attempt.
    pub(crate) fn requeue(&mut self, reason: String) {
        self.status = JobStatus::Pending;
        self.error = Some(reason);
    }
}

/// Pending jobs, FIFO within each priority.
#[derive(Debug, Default)]
pub struct JobQueue {
    high: VecDeque<WarmingJob>,
    medium: VecDeque<WarmingJob>,
    low: VecDeque<WarmingJob>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&mut self, priority: JobPriority) -> &mut VecDeque<WarmingJob> {
        match priority {
            JobPriority::High => &mut self.high,
            JobPriority::Medium => &mut self.medium,
            JobPriority::Low => &mut self.low,
        }
    }

    pub fn push(&mut self, job: WarmingJob) {
        self.lane(job.priority).push_back(job);
    }

    /// Next job: highest priority, oldest first.
    pub fn pop(&mut self) -> Option<WarmingJob> {
        self.high
            .pop_front()
            .or_else(|| self.medium.pop_front())
            .or_else(|| self.low.pop_front())
    }

    pub fn len(&self) -> usize {
        self.high.len() + self.medium.len() + self.low.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn find(&self, id: &Uuid) -> Option<&WarmingJob> {
        self.high
            .iter()
            .chain(self.medium.iter())
            .chain(self.low.iter())
            .find(|j| j.id == *id)
    }

    pub fn contains_target(&self, target: &WarmTarget) -> bool {
        self.high
            .iter()
            .chain(self.medium.iter())
            .chain(self.low.iter())
            .any(|j| j.target == *target)
    }
}
