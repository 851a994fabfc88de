//! Centralized default constants for the swarm research job queue.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates and the worker binary reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// RETRY / BACKOFF
// =============================================================================

/// Maximum number of Searcher invocations before a rate-limited job fails.
pub const RETRY_CEILING: u32 = 5;

/// Base delay for exponential backoff when the upstream gives no hint.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Upper bound for the exponential backoff delay (5 minutes).
pub const BACKOFF_CAP_MS: u64 = 300_000;

/// Lower bound of the jitter multiplier applied to exponential delays.
pub const BACKOFF_JITTER_MIN: f64 = 0.5;

/// Upper bound of the jitter multiplier applied to exponential delays.
pub const BACKOFF_JITTER_MAX: f64 = 1.0;

/// Longest upstream `retry_after` hint honoured (24 hours). Larger hints are
/// clamped to this.
pub const RETRY_AFTER_MAX_SECS: u64 = 86_400;

/// Smallest delay ever scheduled, so `next_attempt_at` is always in the future.
pub const BACKOFF_MIN_MS: u64 = 1;

// =============================================================================
// SCHEDULER / WORKER
// =============================================================================

/// Interval between delayed-set promotion ticks.
pub const SCHEDULER_TICK_MS: u64 = 1_000;

/// Default number of concurrent worker loops.
pub const WORKER_CONCURRENCY: usize = 4;

/// How long a worker loop waits on an empty ready queue before re-checking
/// for shutdown.
pub const POP_TIMEOUT_MS: u64 = 5_000;

/// Execution timeout for a single Searcher call (5 minutes).
pub const SEARCH_TIMEOUT_SECS: u64 = 300;

/// Default worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Safety-net re-check interval for backends whose wake-ups can be missed
/// (e.g. rows inserted by another process).
pub const QUEUE_RECHECK_MS: u64 = 1_000;

// =============================================================================
// SUBMISSION
// =============================================================================

/// Default `max_results` when a submission does not specify one.
pub const MAX_RESULTS: u32 = 25;

/// Hard upper bound on `max_results` accepted at submission.
pub const MAX_RESULTS_LIMIT: u32 = 500;

/// Default page size for recent-job listings.
pub const PAGE_LIMIT: i64 = 50;

// =============================================================================
// UPSTREAM SEARCHERS
// =============================================================================

/// Timeout for one HTTP call to a search tool endpoint.
pub const SEARCH_HTTP_TIMEOUT_SECS: u64 = 30;

/// Default page depth forwarded to search tool endpoints.
pub const SEARCH_DEPTH: u32 = 1;

/// Maximum records produced per query by the mock searcher.
pub const MOCK_MAX_RECORDS: usize = 5;

// =============================================================================
// RETENTION
// =============================================================================

/// Terminal jobs older than this many days are eligible for pruning.
pub const RETENTION_DAYS: i64 = 30;
