//! Cache Warmer Engine
//!
//! Drains a bounded priority queue of warming jobs with a fixed number of
//! concurrent workers.
//!
//! # Dispatch
//!
//! ```text
//! enqueue ──▶ JobQueue (high │ medium │ low) ──pump──▶ running (≤ max_concurrent_jobs)
//!                   ▲                                      │
//!                   └──────── retry ◀── complete ◀─────────┘ task under timeout
//! ```
//!
//! Dispatch state lives behind one lock; job bodies run in their own tasks
//! and re-enter the dispatcher through `complete`, which pumps the queue
//! again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::job::{JobOutcome, JobPriority, JobQueue, JobStatus, WarmTarget, WarmingJob};
use super::strategy::{WarmPhase, WarmingStrategy};
use crate::cache::CacheFacade;
use crate::config::WarmerSettings;
use crate::domain::ports::{fetch_entity, Clock, EnrichmentProvider};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Warmer configuration
#[derive(Debug, Clone)]
pub struct WarmerConfig {
    pub enabled: bool,
    pub max_concurrent_jobs: usize,
    /// Hard limit per job execution
    pub job_timeout: Duration,
    /// Pending plus running jobs
    pub queue_size_limit: usize,
    pub interval: Duration,
    pub startup_delay: Duration,
    /// Extra attempts for a failed job
    pub max_retries: u32,
    /// Finished jobs retained for inspection
    pub history_size: usize,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self::from(&WarmerSettings::default())
    }
}

impl From<&WarmerSettings> for WarmerConfig {
    fn from(settings: &WarmerSettings) -> Self {
        Self {
            enabled: settings.enabled,
            max_concurrent_jobs: settings.max_concurrent_jobs.max(1),
            job_timeout: Duration::from_secs(settings.job_timeout_seconds),
            queue_size_limit: settings.queue_size_limit.max(1),
            interval: Duration::from_secs(settings.interval_seconds.max(1)),
            startup_delay: Duration::from_secs(settings.startup_delay_seconds),
            max_retries: settings.max_retries,
            history_size: settings.history_size,
        }
    }
}

/// Warmer counters and queue depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmerStats {
    pub enqueued: u64,
    pub completed: u64,
    pub already_cached: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub retried: u64,
    pub rejected: u64,
    pub pending: usize,
    pub running: usize,
}

#[derive(Default)]
struct WarmerState {
    queue: JobQueue,
    running: HashMap<Uuid, WarmingJob>,
    /// Finished jobs, newest last
    history: VecDeque<WarmingJob>,
    stats: WarmerStats,
}

impl WarmerState {
    fn in_flight(&self) -> usize {
        self.queue.len() + self.running.len()
    }

    fn has_target(&self, target: &WarmTarget) -> bool {
        self.queue.contains_target(target) || self.running.values().any(|j| j.target == *target)
    }
}

fn failure_reason(error: &Error) -> String {
    match error {
        Error::Timeout(_) => "timeout".to_string(),
        other => other.to_string(),
    }
}

// =============================================================================
// Cache Warmer
// =============================================================================

/// Background cache warmer
pub struct CacheWarmer {
    config: WarmerConfig,
    facade: Arc<CacheFacade>,
    enrichment: Arc<dyn EnrichmentProvider>,
    clock: Arc<dyn Clock>,
    state: Mutex<WarmerState>,
    strategies: RwLock<Vec<(WarmPhase, Arc<dyn WarmingStrategy>)>>,
    /// Signalled whenever a job finishes
    finished: Notify,
}

impl CacheWarmer {
    pub fn new(
        config: WarmerConfig,
        facade: Arc<CacheFacade>,
        enrichment: Arc<dyn EnrichmentProvider>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            facade,
            enrichment,
            clock,
            state: Mutex::new(WarmerState::default()),
            strategies: RwLock::new(Vec::new()),
            finished: Notify::new(),
        })
    }

    pub fn config(&self) -> &WarmerConfig {
        &self.config
    }

    // =========================================================================
    // Strategies
    // =========================================================================

    /// Register a strategy for a phase. A name already registered for the
    /// phase is replaced.
    pub fn register_strategy(&self, phase: WarmPhase, strategy: Arc<dyn WarmingStrategy>) {
        let mut strategies = self.strategies.write();
        strategies.retain(|(p, s)| !(*p == phase && s.name() == strategy.name()));
        debug!(strategy = strategy.name(), ?phase, "Registered warming strategy");
        strategies.push((phase, strategy));
    }

    pub fn strategy_names(&self, phase: WarmPhase) -> Vec<String> {
        self.strategies
            .read()
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, s)| s.name().to_string())
            .collect()
    }

    /// Expand every strategy of `phase` and enqueue the results.
    ///
    /// A failing strategy is logged and skipped. Targets already pending or
    /// running are not queued again. Returns the number of jobs enqueued.
    #[instrument(skip(self))]
    pub async fn run_strategies(self: &Arc<Self>, phase: WarmPhase, priority: JobPriority) -> usize {
        let strategies: Vec<Arc<dyn WarmingStrategy>> = self
            .strategies
            .read()
            .iter()
            .filter(|(p, _)| *p == phase)
            .map(|(_, s)| s.clone())
            .collect();

        let mut enqueued = 0;
        for strategy in strategies {
            let targets = match strategy.targets(&self.facade).await {
                Ok(targets) => targets,
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Warming strategy failed, skipping");
                    continue;
                }
            };

            for target in targets {
                if !target.domain.is_warmable() {
                    debug!(%target, "Skipping target without enrichment source");
                    continue;
                }
                match self.enqueue_unique(target, priority) {
                    Ok(Some(_)) => enqueued += 1,
                    Ok(None) => {}
                    Err(e) => {
                        warn!(strategy = strategy.name(), error = %e, "Stopping strategy expansion");
                        break;
                    }
                }
            }
        }

        info!(enqueued, "Warming strategies expanded");
        enqueued
    }

    /// Re-run the startup strategies at high priority.
    pub async fn force_startup_warming(self: &Arc<Self>) -> usize {
        self.run_strategies(WarmPhase::Startup, JobPriority::High).await
    }

    // =========================================================================
    // Queue
    // =========================================================================

    /// Queue a job and dispatch whatever capacity allows.
    ///
    /// Fails with `Error::QueueFull` when pending plus running jobs reach
    /// the limit.
    pub fn enqueue(self: &Arc<Self>, target: WarmTarget, priority: JobPriority) -> Result<Uuid> {
        let mut state = self.state.lock();
        self.push_job(&mut state, target, priority)
    }

    /// Like `enqueue`, but returns `Ok(None)` when a job for `target` is
    /// already pending or running.
    pub fn enqueue_unique(
        self: &Arc<Self>,
        target: WarmTarget,
        priority: JobPriority,
    ) -> Result<Option<Uuid>> {
        let mut state = self.state.lock();
        if state.has_target(&target) {
            debug!(%target, "Warming job already in flight");
            return Ok(None);
        }
        self.push_job(&mut state, target, priority).map(Some)
    }

    fn push_job(
        self: &Arc<Self>,
        state: &mut WarmerState,
        target: WarmTarget,
        priority: JobPriority,
    ) -> Result<Uuid> {
        if state.in_flight() >= self.config.queue_size_limit {
            state.stats.rejected += 1;
            return Err(Error::QueueFull {
                limit: self.config.queue_size_limit,
            });
        }

        let job = WarmingJob::new(target, priority, self.clock.now());
        let id = job.id;
        debug!(job = %id, target = %job.target, ?priority, "Enqueued warming job");
        state.queue.push(job);
        state.stats.enqueued += 1;

        self.pump(state);
        Ok(id)
    }

    /// Start pending jobs while worker slots are free.
    fn pump(self: &Arc<Self>, state: &mut WarmerState) {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No async runtime, warming jobs stay pending");
            return;
        };

        while state.running.len() < self.config.max_concurrent_jobs {
            let Some(mut job) = state.queue.pop() else {
                break;
            };
            job.start(self.clock.now());
            let (id, target) = (job.id, job.target.clone());
            state.running.insert(id, job);

            let warmer = Arc::clone(self);
            let limit = self.config.job_timeout;
            runtime.spawn(async move {
                let worker = Arc::clone(&warmer);
                let mut task = tokio::spawn(async move { worker.execute(&target).await });
                let outcome = match timeout(limit, &mut task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join)) => Err(Error::Internal(format!("warming task aborted: {}", join))),
                    Err(_) => {
                        task.abort();
                        Err(Error::Timeout(limit))
                    }
                };
                warmer.complete(id, outcome);
            });
        }
    }

    /// Skip if cached, otherwise fetch and write through the facade.
    async fn execute(&self, target: &WarmTarget) -> Result<JobOutcome> {
        let extra = target.extra.as_deref();
        if self.facade.contains_entity(target.domain, &target.id, extra).await {
            return Ok(JobOutcome::AlreadyCached);
        }

        let value = fetch_entity(self.enrichment.as_ref(), target.domain, &target.id, extra).await?;
        self.facade
            .put_entity(target.domain, &target.id, extra, value, None)
            .await?;
        Ok(JobOutcome::Fetched)
    }

    fn complete(self: &Arc<Self>, id: Uuid, outcome: Result<JobOutcome>) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        let Some(mut job) = state.running.remove(&id) else {
            return;
        };

        match outcome {
            Ok(result) => {
                job.complete(result, now);
                state.stats.completed += 1;
                if result == JobOutcome::AlreadyCached {
                    state.stats.already_cached += 1;
                }
                debug!(job = %id, target = %job.target, ?result, "Warming job completed");
                self.archive(&mut state, job);
            }
            Err(e) => {
                if matches!(e, Error::Timeout(_)) {
                    state.stats.timeouts += 1;
                }
                let reason = failure_reason(&e);
                if job.attempts <= self.config.max_retries {
                    debug!(job = %id, attempt = job.attempts, %reason, "Retrying warming job");
                    job.requeue(reason);
                    state.stats.retried += 1;
                    state.queue.push(job);
                } else {
                    warn!(job = %id, target = %job.target, %reason, "Warming job failed");
                    job.fail(reason, now);
                    state.stats.failed += 1;
                    self.archive(&mut state, job);
                }
            }
        }

        self.pump(&mut state);
        drop(state);
        self.finished.notify_waiters();
    }

    fn archive(&self, state: &mut WarmerState, job: WarmingJob) {
        if self.config.history_size == 0 {
            return;
        }
        while state.history.len() >= self.config.history_size {
            state.history.pop_front();
        }
        state.history.push_back(job);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Look a job up wherever it currently is.
    pub fn job(&self, id: &Uuid) -> Option<WarmingJob> {
        let state = self.state.lock();
        state
            .running
            .get(id)
            .or_else(|| state.queue.find(id))
            .or_else(|| state.history.iter().rev().find(|j| j.id == *id))
            .cloned()
    }

    /// Finished jobs, oldest first.
    pub fn history(&self) -> Vec<WarmingJob> {
        self.state.lock().history.iter().cloned().collect()
    }

    pub fn stats(&self) -> WarmerStats {
        let state = self.state.lock();
        WarmerStats {
            pending: state.queue.len(),
            running: state.running.len(),
            ..state.stats.clone()
        }
    }

    /// Wait until job `id` has finished and return it.
    pub async fn wait_for(&self, id: &Uuid) -> Option<WarmingJob> {
        loop {
            let notified = self.finished.notified();
            match self.job(id) {
                Some(job) if job.status.is_finished() => return Some(job),
                Some(_) => notified.await,
                None => return None,
            }
        }
    }

    /// Wait until nothing is pending or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.finished.notified();
            if self.state.lock().in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Run startup warming after the configured delay, then the periodic
    /// strategies on every interval until `shutdown` fires.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let warmer = Arc::clone(self);
        tokio::spawn(async move {
            if !warmer.config.enabled {
                info!("Cache warming disabled");
                return;
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(warmer.config.startup_delay) => {}
            }
            let started = warmer.force_startup_warming().await;
            info!(jobs = started, "Startup cache warming queued");

            let period = warmer.config.interval;
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Cache warmer shutting down");
                        break;
                    }
                    _ = tick.tick() => {
                        warmer.run_strategies(WarmPhase::Periodic, JobPriority::Medium).await;
                    }
                }
            }
        })
    }
}

impl std::fmt::Debug for CacheWarmer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWarmer")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
