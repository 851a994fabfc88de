//! HTTP searcher for MCP-style tool endpoints.
//!
//! A tool endpoint accepts `POST {base_url}/call` with a JSON body
//! `{id, query, max_results, depth, filters}` and answers `200` with
//! `{"response": [...]}`. Status codes map onto [`SearchError`]:
//!
//! | Status | Outcome |
//! |--------|---------|
//! | 200 | records from `response` |
//! | 429 | `RateLimited`, `Retry-After` as seconds or HTTP-date |
//! | 400, 422 | `InvalidQuery` with the upstream message |
//! | other / transport error | `UpstreamUnavailable` |

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use swarm_core::defaults::{SEARCH_DEPTH, SEARCH_HTTP_TIMEOUT_SECS};
use swarm_core::{new_v7, Error, Record, Result, SearchError, Searcher};

use crate::mapping::record_from_upstream;

/// Source name used when none is configured.
pub const DEFAULT_SOURCE: &str = "mcp";

#[derive(Debug, Serialize)]
struct CallRequest<'a> {
    id: String,
    query: &'a str,
    max_results: usize,
    depth: u32,
    filters: Option<&'a Value>,
}

/// Searcher backed by a remote tool endpoint.
pub struct McpSearcher {
    client: Client,
    base_url: String,
    source: String,
    depth: u32,
    filters: Option<Value>,
}

impl McpSearcher {
    /// Create a searcher for `base_url` with default timeout and depth.
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(SEARCH_HTTP_TIMEOUT_SECS))
    }

    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            source: DEFAULT_SOURCE.to_string(),
            depth: SEARCH_DEPTH,
            filters: None,
        })
    }

    /// Create from environment variables. `Ok(None)` when no URL is set.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `MCP_SEARCH_URL` | unset |
    /// | `MCP_SEARCH_SOURCE` | `mcp` |
    /// | `MCP_SEARCH_TIMEOUT_SECS` | `30` |
    /// | `MCP_SEARCH_DEPTH` | `1` |
    pub fn from_env() -> Result<Option<Self>> {
        let Some(base_url) = std::env::var("MCP_SEARCH_URL").ok().filter(|u| !u.is_empty())
        else {
            return Ok(None);
        };
        let timeout = std::env::var("MCP_SEARCH_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(SEARCH_HTTP_TIMEOUT_SECS);
        let depth = std::env::var("MCP_SEARCH_DEPTH")
            .ok()
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(SEARCH_DEPTH);

        let mut searcher =
            Self::with_timeout(base_url, Duration::from_secs(timeout))?.with_depth(depth);
        if let Ok(source) = std::env::var("MCP_SEARCH_SOURCE") {
            if !source.is_empty() {
                searcher = searcher.with_source(source);
            }
        }
        Ok(Some(searcher))
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    /// Extra search parameters forwarded verbatim.
    pub fn with_filters(mut self, filters: Value) -> Self {
        self.filters = Some(filters);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn rejection_message(response: reqwest::Response, status: StatusCode) -> String {
        let body = response.text().await.unwrap_or_default();
        let from_json = serde_json::from_str::<Value>(&body).ok().and_then(|v| {
            ["error", "detail", "message"]
                .iter()
                .find_map(|key| v.get(*key).and_then(Value::as_str).map(str::to_string))
        });
        match from_json {
            Some(message) => message,
            None if !body.trim().is_empty() => body.trim().to_string(),
            None => format!("query rejected with status {}", status.as_u16()),
        }
    }
}

/// Parse a `Retry-After` value: delta-seconds or an HTTP-date.
///
/// Dates in the past yield a non-positive number, which callers treat as no
/// hint.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<f64> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return Some(secs);
    }
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|at| (at.with_timezone(&Utc) - now).num_milliseconds() as f64 / 1000.0)
}

#[async_trait]
impl Searcher for McpSearcher {
    fn source(&self) -> &str {
        &self.source
    }

    #[instrument(skip(self), fields(subsystem = "agents"))]
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> std::result::Result<Vec<Record>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidQuery("query must not be empty".to_string()));
        }

        let start = Instant::now();
        let body = CallRequest {
            id: new_v7().to_string(),
            query,
            max_results,
            depth: self.depth,
            filters: self.filters.as_ref(),
        };

        let response = self
            .client
            .post(format!("{}/call", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Search tool request failed");
                SearchError::UpstreamUnavailable(e.to_string())
            })?;

        let status = response.status();
        match status {
            StatusCode::OK => {
                let payload: Value = response.json().await.map_err(|e| {
                    SearchError::UpstreamUnavailable(format!("malformed response: {}", e))
                })?;
                let items = payload
                    .get("response")
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                let total = items.len();
                let mut records: Vec<Record> =
                    items.iter().filter_map(record_from_upstream).collect();
                if records.len() < total {
                    warn!(
                        skipped = total - records.len(),
                        "Skipped upstream items without an id"
                    );
                }
                records.truncate(max_results);
                debug!(
                    result_count = records.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Search completed"
                );
                Ok(records)
            }
            StatusCode::TOO_MANY_REQUESTS => {
                let hint = response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| parse_retry_after(v, Utc::now()));
                debug!(retry_after_secs = ?hint, "Search tool rate limited");
                Err(SearchError::rate_limited(hint))
            }
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Err(
                SearchError::InvalidQuery(Self::rejection_message(response, status).await),
            ),
            other => Err(SearchError::UpstreamUnavailable(format!(
                "search tool returned status {}",
                other.as_u16()
            ))),
        }
    }
}
