//! Error types for the swarm research job queue.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using swarm-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for job store, queue and service operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Queue operation failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::JobNotFound(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Failure reported by a [`Searcher`](crate::Searcher).
///
/// Only `RateLimited` is transient; the worker treats every other variant as
/// terminal unless configured otherwise for `UpstreamUnavailable`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    /// Upstream quota or rate limit hit. `retry_after` is the upstream hint.
    #[error("Rate limited{}", .retry_after.map(|d| format!("; retry after {}s", d.as_secs_f64())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// The query was rejected by the upstream.
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Upstream could not be reached or answered with a server fault.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl SearchError {
    /// Build a rate-limit error from an optional hint in seconds.
    pub fn rate_limited(retry_after_secs: Option<f64>) -> Self {
        let retry_after = retry_after_secs
            .filter(|s| *s > 0.0)
            .and_then(|s| Duration::try_from_secs_f64(s).ok());
        SearchError::RateLimited { retry_after }
    }

    /// Whether this failure is a transient quota signal.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SearchError::RateLimited { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_error_display_queue() {
        let err = Error::Queue("ready list unavailable".to_string());
        assert_eq!(err.to_string(), "Queue error: ready list unavailable");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_error_display_invalid_input() {
        let err = Error::InvalidInput("max_results must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid input: max_results must be positive"
        );
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
        assert_send::<SearchError>();
        assert_sync::<SearchError>();
    }

    #[test]
    fn test_search_error_rate_limited_display() {
        let err = SearchError::RateLimited {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "Rate limited; retry after 30s");

        let err = SearchError::RateLimited { retry_after: None };
        assert_eq!(err.to_string(), "Rate limited");
    }

    #[test]
    fn test_search_error_rate_limited_ignores_non_positive_hint() {
        assert_eq!(
            SearchError::rate_limited(Some(0.0)),
            SearchError::RateLimited { retry_after: None }
        );
        assert_eq!(
            SearchError::rate_limited(Some(-3.0)),
            SearchError::RateLimited { retry_after: None }
        );
        assert_eq!(
            SearchError::rate_limited(Some(f64::INFINITY)),
            SearchError::RateLimited { retry_after: None }
        );
        assert_eq!(
            SearchError::rate_limited(Some(1.5)),
            SearchError::RateLimited {
                retry_after: Some(Duration::from_millis(1500))
            }
        );
    }

    #[test]
    fn test_search_error_is_rate_limited() {
        assert!(SearchError::rate_limited(None).is_rate_limited());
        assert!(!SearchError::InvalidQuery("empty".into()).is_rate_limited());
        assert!(!SearchError::UpstreamUnavailable("503".into()).is_rate_limited());
    }
}
