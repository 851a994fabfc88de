//! # swarm-agents
//!
//! [`Searcher`](swarm_core::Searcher) implementations.
//!
//! - [`McpSearcher`]: HTTP tool endpoint (`POST {url}/call`)
//! - [`MockSearcher`]: canned or scripted outcomes for tests and local runs
//!
//! Upstream objects are normalized by [`record_from_upstream`].

pub mod mapping;
pub mod mcp;
pub mod mock;

use std::sync::Arc;

use tracing::info;

use swarm_core::{Result, Searcher};

pub use mapping::{record_from_upstream, YOUTUBE_WATCH_URL};
pub use mcp::{parse_retry_after, McpSearcher};
pub use mock::{canned_records, MockCall, MockOutcome, MockSearcher};

/// Pick a searcher from the environment: [`McpSearcher`] when
/// `MCP_SEARCH_URL` is set, otherwise the canned [`MockSearcher`].
pub fn searcher_from_env() -> Result<Arc<dyn Searcher>> {
    match McpSearcher::from_env()? {
        Some(searcher) => {
            info!(
                subsystem = "agents",
                source = searcher.source(),
                url = searcher.base_url(),
                "Using MCP search tool"
            );
            Ok(Arc::new(searcher))
        }
        None => {
            info!(subsystem = "agents", "MCP_SEARCH_URL not set, using mock searcher");
            Ok(Arc::new(MockSearcher::new()))
        }
    }
}
