//! Connection pool sizing for the Postgres backend.
//!
//! Every worker loop holds at most one connection at a time (pop, claim or
//! state write), and the scheduler holds one while promoting. A pool smaller
//! than `loops + 1` makes loops queue on `acquire` instead of on the job
//! queue, so [`PoolConfig::for_workers`] raises the ceiling to cover them.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};

use swarm_core::{Error, Result};

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long `acquire` waits before the operation fails with a database error.
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl PoolConfig {
    /// Read pool settings from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `DATABASE_MAX_CONNECTIONS` | `10` |
    /// | `DATABASE_ACQUIRE_TIMEOUT_SECS` | `30` |
    /// | `DATABASE_IDLE_TIMEOUT_SECS` | `600` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_connections: env_u64("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(defaults.max_connections)
                .max(1),
            acquire_timeout: env_u64("DATABASE_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
            idle_timeout: env_u64("DATABASE_IDLE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            ..defaults
        }
    }

    /// Raise `max_connections` so `loops` worker loops and the scheduler
    /// never wait on each other for a connection.
    pub fn for_workers(mut self, loops: usize) -> Self {
        let needed = u32::try_from(loops).unwrap_or(u32::MAX).saturating_add(1);
        if self.max_connections < needed {
            warn!(
                subsystem = "db",
                configured = self.max_connections,
                needed,
                "Pool too small for worker concurrency; raising max_connections"
            );
            self.max_connections = needed;
        }
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(1);
        self.min_connections = self.min_connections.min(self.max_connections);
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Connect with [`PoolConfig::default`].
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "db",
        max_connections = config.max_connections,
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool connected"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_workers_raises_small_pool() {
        let config = PoolConfig::default().max_connections(2).for_workers(4);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn test_for_workers_keeps_larger_pool() {
        let config = PoolConfig::default().max_connections(20).for_workers(4);
        assert_eq!(config.max_connections, 20);
    }

    #[test]
    fn test_max_connections_floor_and_min_clamp() {
        let config = PoolConfig::default().max_connections(0);
        assert_eq!(config.max_connections, 1);
        assert!(config.min_connections <= config.max_connections);
    }
}
