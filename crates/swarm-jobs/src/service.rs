//! Submission and status interface.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use swarm_core::defaults::{MAX_RESULTS_LIMIT, PAGE_LIMIT};
use swarm_core::{
    CreateJobRequest, Error, Job, JobError, JobQueue, JobStats, JobStatus, JobStore, JobUpdate,
    QueueDepth, Result,
};
use swarm_db::Backends;

/// Job counts plus queue depth.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStats {
    pub jobs: JobStats,
    pub queue: QueueDepth,
}

/// Entry point for callers: submit, inspect and cancel research jobs.
#[derive(Clone)]
pub struct ResearchService {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn JobQueue>,
}

impl ResearchService {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn JobQueue>) -> Self {
        Self { store, queue }
    }

    pub fn from_backends(backends: Backends) -> Self {
        Self::new(backends.store, backends.queue)
    }

    fn validate(request: &CreateJobRequest) -> Result<()> {
        if request.query.trim().is_empty() {
            return Err(Error::InvalidInput("query must not be empty".to_string()));
        }
        if request.max_results == 0 {
            return Err(Error::InvalidInput("max_results must be at least 1".to_string()));
        }
        if request.max_results > MAX_RESULTS_LIMIT {
            return Err(Error::InvalidInput(format!(
                "max_results must be at most {}",
                MAX_RESULTS_LIMIT
            )));
        }
        Ok(())
    }

    /// Validate, persist as pending and enqueue. Returns the new job id.
    pub async fn submit(&self, request: CreateJobRequest) -> Result<Uuid> {
        Self::validate(&request)?;

        let id = self.store.create(&request).await?;
        if let Err(e) = self.queue.push(id).await {
            error!(job_id = %id, error = %e, "Failed to enqueue new job");
            // A pending job outside the queue would never run.
            match self
                .store
                .compare_and_set(id, &[JobStatus::Pending], JobUpdate::failed(JobError::internal()))
                .await
            {
                Ok(true) => warn!(job_id = %id, "Unqueued job marked failed"),
                Ok(false) => warn!(job_id = %id, "Unqueued job already left pending"),
                Err(cas_err) => error!(
                    job_id = %id,
                    error = %cas_err,
                    "Failed to mark unqueued job; it stays pending outside the queue"
                ),
            }
            return Err(e);
        }

        info!(
            job_id = %id,
            max_results = request.max_results,
            prompt_id = request.prompt_id.as_deref(),
            "Research job submitted"
        );
        Ok(id)
    }

    /// Current state of a job. Never blocks on the job's progress.
    pub async fn get_status(&self, id: Uuid) -> Result<Job> {
        self.store.get(id).await
    }

    /// Fail a job that no worker has claimed yet.
    ///
    /// Returns `false` when the job is running or already terminal.
    pub async fn cancel(&self, id: Uuid) -> Result<bool> {
        let cancelled = self
            .store
            .compare_and_set(
                id,
                &JobStatus::CLAIMABLE,
                JobUpdate::failed(JobError::cancelled()),
            )
            .await?;
        if !cancelled {
            debug!(job_id = %id, "Cancel refused; job already claimed or finished");
            return Ok(false);
        }

        // A worker that already popped the id will lose its claim instead.
        self.queue.remove(id).await?;
        info!(job_id = %id, "Research job cancelled");
        Ok(true)
    }

    /// Newest jobs first. `None` uses the default page size.
    pub async fn list_recent(&self, limit: Option<i64>) -> Result<Vec<Job>> {
        let limit = limit.unwrap_or(PAGE_LIMIT).clamp(1, PAGE_LIMIT * 20);
        self.store.list_recent(limit).await
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            jobs: self.store.stats().await?,
            queue: self.queue.depth().await?,
        })
    }
}
