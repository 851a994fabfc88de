//! Research job worker: claim, search, record the outcome.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use swarm_core::defaults::{
    BACKOFF_BASE_MS, BACKOFF_CAP_MS, EVENT_BUS_CAPACITY, POP_TIMEOUT_MS, QUEUE_RECHECK_MS,
    RETRY_CEILING, SCHEDULER_TICK_MS, SEARCH_TIMEOUT_SECS, WORKER_CONCURRENCY,
};
use swarm_core::{
    extract_timestamp, Error, Job, JobError, JobErrorKind, JobQueue, JobStatus, JobStore,
    JobUpdate, Record, Result, SearchError, Searcher,
};
use swarm_db::Backends;

use crate::backoff::BackoffPolicy;
use crate::scheduler::Scheduler;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Searcher invocations allowed before a rate-limited job fails.
    pub retry_ceiling: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Interval between scheduler promotion ticks.
    pub scheduler_tick_interval: Duration,
    /// Number of concurrent worker loops.
    pub worker_concurrency: usize,
    /// How long one blocking pop waits before the loop re-checks shutdown.
    pub pop_timeout: Duration,
    /// Upper bound on a single Searcher call.
    pub search_timeout: Duration,
    /// Route `UpstreamUnavailable` through the backoff path instead of failing.
    pub retry_upstream_unavailable: bool,
    /// Whether to start any loops at all.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            retry_ceiling: RETRY_CEILING,
            backoff_base: Duration::from_millis(BACKOFF_BASE_MS),
            backoff_cap: Duration::from_millis(BACKOFF_CAP_MS),
            scheduler_tick_interval: Duration::from_millis(SCHEDULER_TICK_MS),
            worker_concurrency: WORKER_CONCURRENCY,
            pop_timeout: Duration::from_millis(POP_TIMEOUT_MS),
            search_timeout: Duration::from_secs(SEARCH_TIMEOUT_SECS),
            retry_upstream_unavailable: false,
            enabled: true,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.trim(), "false" | "0" | "no"))
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `RESEARCH_WORKER_ENABLED` | `true` | Enable/disable job processing |
    /// | `RESEARCH_WORKER_CONCURRENCY` | `4` | Number of worker loops |
    /// | `RESEARCH_RETRY_CEILING` | `5` | Attempts before a rate-limited job fails |
    /// | `RESEARCH_BACKOFF_BASE_MS` | `1000` | Exponential backoff base |
    /// | `RESEARCH_BACKOFF_CAP_MS` | `300000` | Exponential backoff cap |
    /// | `RESEARCH_SCHEDULER_TICK_MS` | `1000` | Delayed-set promotion interval |
    /// | `RESEARCH_POP_TIMEOUT_MS` | `5000` | Blocking pop timeout |
    /// | `RESEARCH_SEARCH_TIMEOUT_SECS` | `300` | Per-call searcher timeout |
    /// | `RESEARCH_RETRY_UPSTREAM_UNAVAILABLE` | `false` | Retry upstream faults with backoff |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            retry_ceiling: env_parse::<u32>("RESEARCH_RETRY_CEILING")
                .unwrap_or(RETRY_CEILING)
                .max(1),
            backoff_base: env_parse::<u64>("RESEARCH_BACKOFF_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_base),
            backoff_cap: env_parse::<u64>("RESEARCH_BACKOFF_CAP_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_cap),
            scheduler_tick_interval: env_parse::<u64>("RESEARCH_SCHEDULER_TICK_MS")
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(defaults.scheduler_tick_interval),
            worker_concurrency: env_parse::<usize>("RESEARCH_WORKER_CONCURRENCY")
                .unwrap_or(WORKER_CONCURRENCY)
                .max(1),
            pop_timeout: env_parse::<u64>("RESEARCH_POP_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.pop_timeout),
            search_timeout: env_parse::<u64>("RESEARCH_SEARCH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.search_timeout),
            retry_upstream_unavailable: env_flag("RESEARCH_RETRY_UPSTREAM_UNAVAILABLE", false),
            enabled: env_flag("RESEARCH_WORKER_ENABLED", true),
        }
    }

    pub fn with_retry_ceiling(mut self, ceiling: u32) -> Self {
        self.retry_ceiling = ceiling.max(1);
        self
    }

    pub fn with_backoff(mut self, base: Duration, cap: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_cap = cap;
        self
    }

    pub fn with_scheduler_tick(mut self, interval: Duration) -> Self {
        self.scheduler_tick_interval = interval;
        self
    }

    pub fn with_concurrency(mut self, loops: usize) -> Self {
        self.worker_concurrency = loops.max(1);
        self
    }

    pub fn with_pop_timeout(mut self, timeout: Duration) -> Self {
        self.pop_timeout = timeout;
        self
    }

    pub fn with_search_timeout(mut self, timeout: Duration) -> Self {
        self.search_timeout = timeout;
        self
    }

    pub fn with_retry_upstream_unavailable(mut self, retry: bool) -> Self {
        self.retry_upstream_unavailable = retry;
        self
    }

    /// Enable or disable job processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.backoff_base, self.backoff_cap)
    }
}

/// Event emitted by the job worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    /// Loops and scheduler started.
    WorkerStarted { loops: usize },
    /// A job was claimed and its search is starting.
    JobStarted { job_id: Uuid, attempt: u32 },
    JobSucceeded { job_id: Uuid, records: usize },
    JobRetryScheduled {
        job_id: Uuid,
        attempt: u32,
        delay: Duration,
    },
    JobFailed { job_id: Uuid, error: JobError },
    /// All loops and the scheduler have exited.
    WorkerStopped,
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The pop timed out.
    Idle,
    /// The popped id could not be claimed (stale, cancelled or taken).
    Discarded,
    /// The job was processed and left in this status.
    Finished(JobStatus),
}

enum SearchFault {
    Search(SearchError),
    Panicked(String),
    TimedOut,
    Aborted,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    event_tx: broadcast::Sender<WorkerEvent>,
    event_rx: broadcast::Receiver<WorkerEvent>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }

    /// Whether any loop was started.
    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Signal every loop and the scheduler to stop, then wait for them.
    ///
    /// A loop finishes the job it has claimed before it exits.
    pub async fn shutdown(self) -> Result<()> {
        // Err only when every receiver is gone, i.e. nothing is running.
        let _ = self.shutdown_tx.send(true);

        let started = !self.tasks.is_empty();
        let mut panicked = 0usize;
        for result in futures::future::join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = ?e, "Worker task panicked");
                panicked += 1;
            }
        }

        if started {
            let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
            info!("Research worker stopped");
        }
        if panicked > 0 {
            return Err(Error::Internal(format!("{} worker task(s) panicked", panicked)));
        }
        Ok(())
    }
}

/// Pulls job ids from the queue and drives each job to its next state.
pub struct JobWorker {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    searcher: Arc<dyn Searcher>,
    config: WorkerConfig,
    backoff: BackoffPolicy,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl JobWorker {
    /// Create a new job worker.
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn JobQueue>,
        searcher: Arc<dyn Searcher>,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            store,
            queue,
            searcher,
            backoff: config.backoff(),
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the loops and the scheduler, returning a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let event_tx = self.event_tx.clone();
        let event_rx = self.event_tx.subscribe();

        if !self.config.enabled {
            info!("Research worker is disabled, not starting");
            return WorkerHandle {
                shutdown_tx,
                event_tx,
                event_rx,
                tasks: Vec::new(),
            };
        }

        let loops = self.config.worker_concurrency.max(1);
        info!(
            loops,
            searcher = self.searcher.source(),
            retry_ceiling = self.config.retry_ceiling,
            tick_ms = self.config.scheduler_tick_interval.as_millis() as u64,
            "Research worker started"
        );

        let scheduler = Scheduler::new(self.queue.clone(), self.config.scheduler_tick_interval);
        let worker = Arc::new(self);

        let mut tasks = Vec::with_capacity(loops + 1);
        tasks.push(tokio::spawn(scheduler.run(shutdown_rx.clone())));
        for index in 0..loops {
            let worker = worker.clone();
            let shutdown_rx = shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                worker.run_loop(index, shutdown_rx).await;
            }));
        }

        let _ = event_tx.send(WorkerEvent::WorkerStarted { loops });

        WorkerHandle {
            shutdown_tx,
            event_tx,
            event_rx,
            tasks,
        }
    }

    async fn run_loop(&self, index: usize, shutdown_rx: watch::Receiver<bool>) {
        debug!(worker = index, "Worker loop started");
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            match self.process_next().await {
                Ok(outcome) => {
                    if outcome != LoopOutcome::Idle {
                        debug!(worker = index, ?outcome, "Loop iteration finished");
                    }
                }
                Err(e) => {
                    error!(worker = index, error = %e, "Worker loop iteration failed");
                    tokio::time::sleep(Duration::from_millis(QUEUE_RECHECK_MS)).await;
                }
            }
        }
        debug!(worker = index, "Worker loop stopped");
    }

    /// Run exactly one loop iteration: pop, claim, search, record.
    pub async fn process_next(&self) -> Result<LoopOutcome> {
        match self.queue.pop_blocking(self.config.pop_timeout).await? {
            Some(id) => self.process_job(id).await,
            None => Ok(LoopOutcome::Idle),
        }
    }

    /// Claim and execute one popped id.
    pub async fn process_job(&self, job_id: Uuid) -> Result<LoopOutcome> {
        let claimed = match self
            .store
            .compare_and_set(job_id, &JobStatus::CLAIMABLE, JobUpdate::claim())
            .await
        {
            Ok(claimed) => claimed,
            Err(e) if e.is_not_found() => {
                warn!(%job_id, "Popped id has no job; discarding");
                return Ok(LoopOutcome::Discarded);
            }
            Err(e) => return Err(e),
        };
        if !claimed {
            debug!(%job_id, "Claim lost; discarding stale id");
            return Ok(LoopOutcome::Discarded);
        }

        let job = match self.store.get(job_id).await {
            Ok(job) => job,
            Err(e) => {
                error!(%job_id, error = %e, "Failed to load claimed job");
                self.abandon(job_id, JobStatus::Running).await;
                return Err(e);
            }
        };
        let age_ms = extract_timestamp(&job_id).map(|at| (Utc::now() - at).num_milliseconds());
        info!(
            %job_id,
            attempt = job.attempts,
            searcher = self.searcher.source(),
            age_ms,
            "Processing research job"
        );
        let _ = self.event_tx.send(WorkerEvent::JobStarted {
            job_id,
            attempt: job.attempts,
        });

        let start = Instant::now();
        let outcome = self.run_search(&job).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(records) => self.succeed(&job, records, duration_ms).await,
            Err(SearchFault::Search(SearchError::RateLimited { retry_after })) => {
                self.retry_or_fail(&job, retry_after, "rate limited").await
            }
            Err(SearchFault::Search(SearchError::UpstreamUnavailable(message)))
                if self.config.retry_upstream_unavailable =>
            {
                warn!(%job_id, %message, "Upstream unavailable; retrying with backoff");
                self.retry_or_fail(&job, None, "upstream unavailable").await
            }
            Err(SearchFault::Search(SearchError::UpstreamUnavailable(message))) => {
                self.fail(
                    &job,
                    JobError::new(JobErrorKind::UpstreamUnavailable, message),
                )
                .await
            }
            Err(SearchFault::Search(SearchError::InvalidQuery(message))) => {
                self.fail(&job, JobError::new(JobErrorKind::InvalidQuery, message))
                    .await
            }
            Err(SearchFault::Panicked(detail)) => {
                error!(%job_id, panic = %detail, "Searcher panicked");
                self.fail(&job, JobError::internal()).await
            }
            Err(SearchFault::TimedOut) => {
                error!(
                    %job_id,
                    timeout_secs = self.config.search_timeout.as_secs(),
                    "Searcher exceeded timeout"
                );
                self.fail(&job, JobError::internal()).await
            }
            Err(SearchFault::Aborted) => {
                error!(%job_id, "Searcher task was cancelled");
                self.fail(&job, JobError::internal()).await
            }
        }
    }

    /// Run the searcher on its own task so a panic stays contained.
    async fn run_search(&self, job: &Job) -> std::result::Result<Vec<Record>, SearchFault> {
        let searcher = self.searcher.clone();
        let query = job.query.clone();
        let max_results = job.max_results as usize;

        let mut task = tokio::spawn(async move { searcher.search(&query, max_results).await });

        match tokio::time::timeout(self.config.search_timeout, &mut task).await {
            Ok(Ok(result)) => result.map_err(SearchFault::Search),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let detail = payload
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| payload.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                Err(SearchFault::Panicked(detail))
            }
            Ok(Err(_)) => Err(SearchFault::Aborted),
            Err(_) => {
                task.abort();
                Err(SearchFault::TimedOut)
            }
        }
    }

    async fn succeed(
        &self,
        job: &Job,
        mut records: Vec<Record>,
        duration_ms: u64,
    ) -> Result<LoopOutcome> {
        records.truncate(job.max_results as usize);
        let count = records.len();

        if !self.finish(job.id, JobUpdate::succeeded(records)).await? {
            return Ok(LoopOutcome::Discarded);
        }
        info!(
            job_id = %job.id,
            attempts = job.attempts,
            result_count = count,
            duration_ms,
            "Research job succeeded"
        );
        let _ = self.event_tx.send(WorkerEvent::JobSucceeded {
            job_id: job.id,
            records: count,
        });
        Ok(LoopOutcome::Finished(JobStatus::Succeeded))
    }

    async fn retry_or_fail(
        &self,
        job: &Job,
        retry_after: Option<Duration>,
        reason: &str,
    ) -> Result<LoopOutcome> {
        if job.attempts >= self.config.retry_ceiling {
            return self
                .fail(job, JobError::retry_ceiling_exceeded(job.attempts))
                .await;
        }

        let delay = self.backoff.delay(job.attempts, retry_after);
        let at = match chrono::Duration::from_std(delay)
            .ok()
            .and_then(|step| Utc::now().checked_add_signed(step))
        {
            Some(at) => at,
            None => {
                error!(
                    job_id = %job.id,
                    delay_ms = delay.as_millis() as u64,
                    "Retry time out of range"
                );
                return self.fail(job, JobError::internal()).await;
            }
        };

        if !self.finish(job.id, JobUpdate::retry_at(at)).await? {
            return Ok(LoopOutcome::Discarded);
        }

        if let Err(e) = self.queue.schedule(job.id, at).await {
            // Never leave a retry_scheduled job unreachable.
            error!(job_id = %job.id, error = %e, "Failed to schedule retry; re-queueing now");
            if let Err(e) = self.queue.push(job.id).await {
                error!(job_id = %job.id, error = %e, "Failed to re-queue job");
                self.abandon(job.id, JobStatus::RetryScheduled).await;
                return Err(e);
            }
        }
        self.evict_if_terminal(job.id).await;

        info!(
            job_id = %job.id,
            attempt = job.attempts,
            delay_ms = delay.as_millis() as u64,
            hinted = retry_after.is_some(),
            reason,
            "Research job retry scheduled"
        );
        let _ = self.event_tx.send(WorkerEvent::JobRetryScheduled {
            job_id: job.id,
            attempt: job.attempts,
            delay,
        });
        Ok(LoopOutcome::Finished(JobStatus::RetryScheduled))
    }

    async fn fail(&self, job: &Job, error: JobError) -> Result<LoopOutcome> {
        if !self.finish(job.id, JobUpdate::failed(error.clone())).await? {
            return Ok(LoopOutcome::Discarded);
        }
        warn!(
            job_id = %job.id,
            attempts = job.attempts,
            kind = error.kind.as_str(),
            error = %error.message,
            "Research job failed"
        );
        let _ = self.event_tx.send(WorkerEvent::JobFailed {
            job_id: job.id,
            error,
        });
        Ok(LoopOutcome::Finished(JobStatus::Failed))
    }

    /// A cancel can land between the `retry_scheduled` CAS and the queue
    /// write, after its own `remove` found nothing. Take the entry back out.
    async fn evict_if_terminal(&self, job_id: Uuid) {
        match self.store.get(job_id).await {
            Ok(job) if job.status.is_terminal() => {
                if let Err(e) = self.queue.remove(job_id).await {
                    error!(%job_id, error = %e, "Failed to drop finished job from queue");
                } else {
                    debug!(
                        %job_id,
                        status = %job.status,
                        "Dropped job finished during retry scheduling"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%job_id, error = %e, "Could not re-check job after scheduling retry"),
        }
    }

    /// Best-effort failure of a job this worker can no longer drive.
    async fn abandon(&self, job_id: Uuid, from: JobStatus) {
        match self
            .store
            .compare_and_set(job_id, &[from], JobUpdate::failed(JobError::internal()))
            .await
        {
            Ok(true) => warn!(%job_id, from = %from, "Abandoned job marked failed"),
            Ok(false) => debug!(%job_id, "Abandoned job already moved on"),
            Err(e) => error!(%job_id, error = %e, "Failed to mark abandoned job; it is stranded"),
        }
    }

    /// CAS out of `running`. `false` means something else moved the job.
    async fn finish(&self, job_id: Uuid, update: JobUpdate) -> Result<bool> {
        let target = update.status;
        let applied = self
            .store
            .compare_and_set(job_id, &[JobStatus::Running], update)
            .await?;
        if !applied {
            warn!(%job_id, %target, "Job left running state while in flight");
        }
        Ok(applied)
    }
}

/// Builder for creating a job worker.
pub struct WorkerBuilder {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
    searcher: Option<Arc<dyn Searcher>>,
    config: WorkerConfig,
}

impl WorkerBuilder {
    /// Create a new worker builder.
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self {
            store,
            queue,
            searcher: None,
            config: WorkerConfig::default(),
        }
    }

    pub fn from_backends(backends: Backends) -> Self {
        Self::new(backends.store, backends.queue)
    }

    /// Set the worker configuration.
    pub fn with_config(mut self, config: WorkerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_searcher(mut self, searcher: Arc<dyn Searcher>) -> Self {
        self.searcher = Some(searcher);
        self
    }

    /// Build and return the worker.
    pub fn build(self) -> Result<JobWorker> {
        let searcher = self
            .searcher
            .ok_or_else(|| Error::Config("worker needs a searcher".to_string()))?;
        Ok(JobWorker::new(self.store, self.queue, searcher, self.config))
    }
}
