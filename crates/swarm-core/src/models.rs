//! Data model: records, jobs, state transitions and queue statistics.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defaults;

// =============================================================================
// RECORDS
// =============================================================================

/// A normalized search result produced by a searcher.
///
/// Immutable once produced. `source_id` is the only identity; the same record
/// may appear in the results of several jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier assigned by the upstream source (video id, post id, ...).
    pub source_id: String,
    /// Title, or body text for sources without titles.
    pub title: String,
    pub author: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub url: Option<String>,
    /// Flat counters such as view or like counts.
    #[serde(default)]
    pub metrics: BTreeMap<String, i64>,
}

impl Record {
    /// Create a record with only the mandatory fields set.
    pub fn new(source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            title: title.into(),
            author: None,
            created_at: None,
            url: None,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_metric(mut self, name: impl Into<String>, value: i64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }
}

// =============================================================================
// JOB TYPES
// =============================================================================

/// Status of a research job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    RetryScheduled,
}

impl JobStatus {
    /// Statuses from which a worker may claim a job.
    pub const CLAIMABLE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::RetryScheduled];

    pub const ALL: [JobStatus; 5] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
        JobStatus::RetryScheduled,
    ];

    /// `Succeeded` and `Failed` never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::RetryScheduled => "retry_scheduled",
        }
    }

    /// Parse the storage representation. Unknown values yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "retry_scheduled" => Some(JobStatus::RetryScheduled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a terminal failure recorded on a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobErrorKind {
    /// The upstream rejected the query. Message is surfaced verbatim.
    InvalidQuery,
    /// The upstream was unreachable or faulted.
    UpstreamUnavailable,
    /// The job was rate-limited on every allowed attempt.
    RetryCeilingExceeded,
    /// The searcher panicked, timed out or misbehaved.
    Internal,
    /// Aborted by a caller before a worker claimed it.
    Cancelled,
}

impl JobErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobErrorKind::InvalidQuery => "invalid_query",
            JobErrorKind::UpstreamUnavailable => "upstream_unavailable",
            JobErrorKind::RetryCeilingExceeded => "retry_ceiling_exceeded",
            JobErrorKind::Internal => "internal",
            JobErrorKind::Cancelled => "cancelled",
        }
    }
}

/// Structured error stored on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: JobErrorKind,
    pub message: String,
}

impl JobError {
    pub fn new(kind: JobErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retry_ceiling_exceeded(attempts: u32) -> Self {
        Self::new(
            JobErrorKind::RetryCeilingExceeded,
            format!("retry ceiling exceeded after {} attempts", attempts),
        )
    }

    /// Generic marker for faults inside the searcher call. Details go to the
    /// log, not to the caller.
    pub fn internal() -> Self {
        Self::new(JobErrorKind::Internal, "internal error")
    }

    pub fn cancelled() -> Self {
        Self::new(JobErrorKind::Cancelled, "cancelled before execution")
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.message)
    }
}

/// A research job and its current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub query: String,
    pub max_results: u32,
    /// Opaque reference passed through to callers; never interpreted.
    pub prompt_id: Option<String>,
    pub status: JobStatus,
    /// Number of searcher invocations so far.
    pub attempts: u32,
    /// Only meaningful while `status == RetryScheduled`.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Present only when `status == Succeeded`.
    pub result: Option<Vec<Record>>,
    /// Present only when `status == Failed`.
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build a freshly submitted job (pending, zero attempts).
    pub fn from_request(id: Uuid, request: &CreateJobRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            query: request.query.clone(),
            max_results: request.max_results,
            prompt_id: request.prompt_id.clone(),
            status: JobStatus::Pending,
            attempts: 0,
            next_attempt_at: None,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    /// Apply a transition in place. Callers must have checked the expected
    /// status; this only encodes how the fields change.
    pub fn apply(&mut self, update: &JobUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        if update.increment_attempts {
            self.attempts = self.attempts.saturating_add(1);
        }
        self.next_attempt_at = update.next_attempt_at;
        self.result = update.result.clone();
        self.error = update.error.clone();
        self.updated_at = now;
        if update.status.is_terminal() {
            self.finished_at = Some(now);
        }
    }
}

/// Submission payload for a new research job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateJobRequest {
    pub query: String,
    #[serde(default = "default_max_results")]
    pub max_results: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

fn default_max_results() -> u32 {
    defaults::MAX_RESULTS
}

impl CreateJobRequest {
    pub fn new(query: impl Into<String>, max_results: u32) -> Self {
        Self {
            query: query.into(),
            max_results,
            prompt_id: None,
        }
    }

    pub fn with_prompt_id(mut self, prompt_id: impl Into<String>) -> Self {
        self.prompt_id = Some(prompt_id.into());
        self
    }
}

/// The fields a compare-and-set writes on success.
///
/// `next_attempt_at`, `result` and `error` replace the stored values
/// wholesale. `attempts` can only move forward, and only by one.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub increment_attempts: bool,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub result: Option<Vec<Record>>,
    pub error: Option<JobError>,
}

impl JobUpdate {
    fn to(status: JobStatus) -> Self {
        Self {
            status,
            increment_attempts: false,
            next_attempt_at: None,
            result: None,
            error: None,
        }
    }

    /// Worker claim: `running`, one more attempt.
    pub fn claim() -> Self {
        Self {
            increment_attempts: true,
            ..Self::to(JobStatus::Running)
        }
    }

    pub fn succeeded(records: Vec<Record>) -> Self {
        Self {
            result: Some(records),
            ..Self::to(JobStatus::Succeeded)
        }
    }

    pub fn retry_at(at: DateTime<Utc>) -> Self {
        Self {
            next_attempt_at: Some(at),
            ..Self::to(JobStatus::RetryScheduled)
        }
    }

    pub fn failed(error: JobError) -> Self {
        Self {
            error: Some(error),
            ..Self::to(JobStatus::Failed)
        }
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Job counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub retry_scheduled: i64,
    pub succeeded: i64,
    pub failed: i64,
}

impl JobStats {
    pub fn total(&self) -> i64 {
        self.pending + self.running + self.retry_scheduled + self.succeeded + self.failed
    }

    /// Increment the counter for `status`.
    pub fn record(&mut self, status: JobStatus) {
        self.add(status, 1);
    }

    pub fn add(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::RetryScheduled => self.retry_scheduled += count,
            JobStatus::Succeeded => self.succeeded += count,
            JobStatus::Failed => self.failed += count,
        }
    }
}

/// Which queue structure currently holds an id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueLocation {
    Ready,
    Delayed,
}

/// Number of entries in each queue structure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: i64,
    pub delayed: i64,
}
