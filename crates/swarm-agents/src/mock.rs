//! Mock searcher for deterministic testing.
//!
//! Without a script, every query yields up to five canned video records
//! (`mock-{i}-{slug}`). A script is a queue of outcomes consumed one per
//! call; once it is exhausted the fallback outcome, if set, repeats forever.
//!
//! ```rust
//! use swarm_agents::mock::{MockOutcome, MockSearcher};
//! use swarm_core::SearchError;
//!
//! let searcher = MockSearcher::new()
//!     .then(MockOutcome::Error(SearchError::rate_limited(Some(30.0))))
//!     .then(MockOutcome::canned(2));
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use swarm_core::defaults::MOCK_MAX_RECORDS;
use swarm_core::{Record, SearchError, Searcher};

use crate::mapping::YOUTUBE_WATCH_URL;

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Canned records, capped at this many (and at the requested maximum).
    Canned(usize),
    Records(Vec<Record>),
    Error(SearchError),
    /// Panic inside the search call.
    Panic(String),
    /// Never return.
    Hang,
}

impl MockOutcome {
    pub fn canned(count: usize) -> Self {
        MockOutcome::Canned(count)
    }
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub query: String,
    pub max_results: usize,
    pub timestamp: std::time::Instant,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockOutcome>,
    fallback: Option<MockOutcome>,
    calls: Vec<MockCall>,
}

/// Mock searcher. Clones share the script and the call log.
#[derive(Clone)]
pub struct MockSearcher {
    source: String,
    latency: Duration,
    state: Arc<Mutex<MockState>>,
}

impl MockSearcher {
    pub fn new() -> Self {
        Self {
            source: "mock".to_string(),
            latency: Duration::ZERO,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Repeat `outcome` for every call once the script is empty.
    pub fn always(outcome: MockOutcome) -> Self {
        let searcher = Self::new();
        searcher.lock().fallback = Some(outcome);
        searcher
    }

    /// Append an outcome to the script.
    pub fn then(self, outcome: MockOutcome) -> Self {
        self.lock().script.push_back(outcome);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Simulated latency for every call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Get all logged calls for assertion.
    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_outcome(&self, query: &str, max_results: usize) -> MockOutcome {
        let mut state = self.lock();
        state.calls.push(MockCall {
            query: query.to_string(),
            max_results,
            timestamp: std::time::Instant::now(),
        });
        state
            .script
            .pop_front()
            .or_else(|| state.fallback.clone())
            .unwrap_or(MockOutcome::Canned(MOCK_MAX_RECORDS))
    }
}

impl Default for MockSearcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercase, runs of non-alphanumerics collapsed to `-`, at most 20 chars.
fn slug(query: &str) -> String {
    let mut out = String::new();
    let mut in_gap = false;
    for c in query.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
            in_gap = false;
        } else if !in_gap {
            out.push('-');
            in_gap = true;
        }
    }
    out.chars().take(20).collect()
}

/// Deterministic video records for `query`.
pub fn canned_records(query: &str, count: usize) -> Vec<Record> {
    let slug = slug(query);
    let now = Utc::now();
    (0..count.min(MOCK_MAX_RECORDS))
        .map(|i| {
            let id = format!("mock-{}-{}", i, slug);
            Record::new(id.clone(), format!("Mock result {} for '{}'", i + 1, query))
                .with_author("Mock Channel")
                .with_url(format!("{}{}", YOUTUBE_WATCH_URL, id))
                .with_created_at(now)
                .with_metric("viewCount", 100 + i as i64 * 10)
                .with_metric("durationSeconds", 60 + i as i64 * 10)
        })
        .collect()
}

#[async_trait]
impl Searcher for MockSearcher {
    fn source(&self) -> &str {
        &self.source
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<Record>, SearchError> {
        let outcome = self.next_outcome(query, max_results);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match outcome {
            MockOutcome::Canned(count) => Ok(canned_records(query, count.min(max_results))),
            MockOutcome::Records(records) => Ok(records),
            MockOutcome::Error(err) => Err(err),
            MockOutcome::Panic(message) => panic!("{}", message),
            MockOutcome::Hang => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug_collapses_and_truncates() {
        assert_eq!(slug("Climate Change"), "climate-change");
        assert_eq!(slug("a  --  b"), "a-b");
        assert_eq!(slug("the quick brown fox jumps over"), "the-quick-brown-fox-");
    }

    #[test]
    fn test_canned_records_are_deterministic_and_capped() {
        let records = canned_records("Climate Change", 50);
        assert_eq!(records.len(), MOCK_MAX_RECORDS);
        assert_eq!(records[0].source_id, "mock-0-climate-change");
        assert_eq!(records[4].source_id, "mock-4-climate-change");
        assert_eq!(
            records[0].url.as_deref(),
            Some("https://www.youtube.com/watch?v=mock-0-climate-change")
        );
        assert_eq!(records[1].metrics.get("viewCount"), Some(&110));
    }

    #[tokio::test]
    async fn test_default_is_canned_within_max_results() {
        let searcher = MockSearcher::new();
        let records = searcher.search("climate change", 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(searcher.call_count(), 1);
        assert_eq!(searcher.calls()[0].query, "climate change");
    }

    #[tokio::test]
    async fn test_script_then_fallback() {
        let searcher = MockSearcher::always(MockOutcome::Error(SearchError::rate_limited(None)))
            .then(MockOutcome::canned(2));

        assert_eq!(searcher.search("q", 10).await.unwrap().len(), 2);
        for _ in 0..3 {
            assert!(searcher.search("q", 10).await.unwrap_err().is_rate_limited());
        }
        assert_eq!(searcher.call_count(), 4);
    }

    #[tokio::test]
    async fn test_clones_share_script() {
        let searcher = MockSearcher::new().then(MockOutcome::Error(SearchError::InvalidQuery(
            "bad".to_string(),
        )));
        let clone = searcher.clone();
        assert!(clone.search("q", 1).await.is_err());
        assert!(searcher.search("q", 1).await.is_ok());
        assert_eq!(searcher.call_count(), 2);
    }
}
