//! Core traits for the job queue abstractions.
//!
//! These traits define the interfaces that concrete backends and upstream
//! searchers must satisfy. Every component receives its store, queue and
//! searcher as constructor arguments; nothing here is global.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, SearchError};
use crate::models::*;

// =============================================================================
// JOB STORE
// =============================================================================

/// Durable keyed storage for job state.
///
/// `compare_and_set` is the only way to change a job's state once created.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job and return its freshly assigned id.
    async fn create(&self, request: &CreateJobRequest) -> Result<Uuid>;

    /// Load a job. Unknown ids yield `Error::JobNotFound`.
    async fn get(&self, id: Uuid) -> Result<Job>;

    /// Atomically apply `update` if the stored status is one of `expected`.
    ///
    /// Returns `Ok(false)` with no effect when the status does not match or
    /// the job is already terminal. Unknown ids yield `Error::JobNotFound`.
    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: &[JobStatus],
        update: JobUpdate,
    ) -> Result<bool>;

    /// Most recently created jobs first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>>;

    /// Job counts by status.
    async fn stats(&self) -> Result<JobStats>;

    /// Delete terminal jobs that finished before `cutoff`. Returns the count.
    ///
    /// Never called by the worker; retention is a maintenance concern.
    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

// =============================================================================
// QUEUE
// =============================================================================

/// Ready FIFO plus delayed set, sharing one id namespace.
///
/// An id is held by at most one of the two structures: `push` takes it out
/// of the delayed set, `schedule` takes it out of the ready FIFO.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append an id to the ready FIFO. Pushing an id already ready is a no-op.
    async fn push(&self, id: Uuid) -> Result<()>;

    /// Pop the oldest ready id, suspending until one arrives or `timeout`
    /// elapses. `Ok(None)` means the timeout elapsed.
    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<Uuid>>;

    /// Place an id in the delayed set, eligible at `at`.
    async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Atomically remove and return every delayed id due at or before `now`,
    /// earliest first.
    async fn pop_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;

    /// Move every due delayed id onto the ready FIFO.
    ///
    /// Backends that can do this in one atomic step should override it; the
    /// default leaves a short window where a promoted id is in neither
    /// structure.
    async fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let due = self.pop_due(now).await?;
        for id in &due {
            self.push(*id).await?;
        }
        if !due.is_empty() {
            debug!(promoted = due.len(), "Promoted due jobs");
        }
        Ok(due)
    }

    /// Drop an id from whichever structure holds it. Returns whether it was
    /// present.
    async fn remove(&self, id: Uuid) -> Result<bool>;

    /// Where an id currently sits, if anywhere.
    async fn location(&self, id: Uuid) -> Result<Option<QueueLocation>>;

    /// Entry counts of both structures.
    async fn depth(&self) -> Result<QueueDepth>;
}

// =============================================================================
// SEARCHER
// =============================================================================

/// Capability to run one query against one upstream source.
///
/// New sources are added by implementing this trait, not by branching on a
/// source type inside the worker.
#[async_trait]
pub trait Searcher: Send + Sync {
    /// Short name of the upstream, used in logs.
    fn source(&self) -> &str;

    /// Run a query and return at most `max_results` records.
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<Record>, SearchError>;
}
