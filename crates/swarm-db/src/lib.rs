//! # swarm-db
//!
//! Storage backends for the swarm research job queue.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL job store and queue (`FOR UPDATE SKIP LOCKED` pops)
//! - In-memory job store and queue for tests and single-process use
//!
//! ## Example
//!
//! ```rust,ignore
//! use swarm_db::{Database, JobStore, CreateJobRequest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/swarm").await?;
//!     db.migrate().await?;
//!
//!     let id = db.jobs.create(&CreateJobRequest::new("rust async", 10)).await?;
//!     println!("Created job: {}", id);
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod memory;
pub mod pool;
pub mod queue;

use std::sync::Arc;

// Re-export core types
pub use swarm_core::*;

pub use jobs::PgJobStore;
pub use memory::{MemoryJobQueue, MemoryJobStore};
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use queue::PgJobQueue;

/// Combined PostgreSQL context with the job store and queue.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job state storage.
    pub jobs: Arc<PgJobStore>,
    /// Ready FIFO and delayed set.
    pub queue: Arc<PgJobQueue>,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: Arc::new(PgJobStore::new(pool.clone())),
            queue: Arc::new(PgJobQueue::new(pool.clone())),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Store and queue as trait objects, ready to hand to the worker.
    pub fn backends(&self) -> Backends {
        Backends {
            store: self.jobs.clone(),
            queue: self.queue.clone(),
        }
    }
}

/// A job store paired with the queue that feeds it.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn JobQueue>,
}

impl Backends {
    /// Fresh in-memory store and queue.
    pub fn in_memory() -> Self {
        Self {
            store: MemoryJobStore::arc(),
            queue: MemoryJobQueue::arc(),
        }
    }
}
