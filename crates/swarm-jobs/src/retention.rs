//! Maintenance sweep that deletes old terminal jobs.
//!
//! Not part of the processing path: the worker never calls it. The worker
//! binary runs it when `RESEARCH_RETENTION_DAYS` is set.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use swarm_core::defaults::RETENTION_DAYS;
use swarm_core::{JobStore, Result};

pub struct RetentionSweep {
    store: Arc<dyn JobStore>,
    retention: chrono::Duration,
}

impl RetentionSweep {
    pub fn new(store: Arc<dyn JobStore>, retention_days: i64) -> Self {
        Self {
            store,
            retention: chrono::Duration::days(retention_days.max(0)),
        }
    }

    /// Sweep configured from `RESEARCH_RETENTION_DAYS`; `None` when unset.
    /// Unparsable values fall back to 30 days.
    pub fn from_env(store: Arc<dyn JobStore>) -> Option<Self> {
        let raw = std::env::var("RESEARCH_RETENTION_DAYS").ok()?;
        let days = raw.trim().parse::<i64>().unwrap_or(RETENTION_DAYS);
        Some(Self::new(store, days))
    }

    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.retention
    }

    /// Delete terminal jobs that finished before `now - retention`.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<u64> {
        let cutoff = self.cutoff(now);
        let removed = self.store.prune_terminal(cutoff).await?;
        info!(
            subsystem = "retention",
            removed,
            retention_days = self.retention.num_days(),
            %cutoff,
            "Retention sweep finished"
        );
        Ok(removed)
    }
}
