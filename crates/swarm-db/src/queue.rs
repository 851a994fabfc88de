//! PostgreSQL ready FIFO and delayed set.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use swarm_core::defaults::QUEUE_RECHECK_MS;
use swarm_core::{Error, JobQueue, QueueDepth, QueueLocation, Result};

/// PostgreSQL implementation of [`JobQueue`].
///
/// Pops use `FOR UPDATE SKIP LOCKED` so any number of workers, in any number
/// of processes, can pull from the same tables. Waiters in this process are
/// woken through a shared [`Notify`]; rows added by other processes are seen
/// on the next periodic re-check.
pub struct PgJobQueue {
    pool: Pool<Postgres>,
    notify: Arc<Notify>,
    recheck: Duration,
}

impl PgJobQueue {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self::with_notify(pool, Arc::new(Notify::new()))
    }

    /// Create a queue sharing an existing notify handle.
    pub fn with_notify(pool: Pool<Postgres>, notify: Arc<Notify>) -> Self {
        Self {
            pool,
            notify,
            recheck: Duration::from_millis(QUEUE_RECHECK_MS),
        }
    }

    /// Get the notify handle used to wake blocked pops.
    pub fn queue_notify(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    async fn try_pop(&self) -> Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM research_ready_queue
             WHERE seq = (
                 SELECT seq FROM research_ready_queue
                 ORDER BY seq
                 FOR UPDATE SKIP LOCKED
                 LIMIT 1
             )
             RETURNING job_id",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn push(&self, id: Uuid) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM research_delayed_jobs WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO research_ready_queue (job_id) VALUES ($1)
             ON CONFLICT (job_id) DO NOTHING",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        self.notify.notify_waiters();
        Ok(())
    }

    async fn pop_blocking(&self, timeout: Duration) -> Result<Option<Uuid>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register before checking so a push between the two is not missed.
            let notified = self.notify.notified();
            if let Some(id) = self.try_pop().await? {
                return Ok(Some(id));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wait = (deadline - now).min(self.recheck);
            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM research_ready_queue WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO research_delayed_jobs (job_id, due_at) VALUES ($1, $2)
             ON CONFLICT (job_id) DO UPDATE SET due_at = EXCLUDED.due_at",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn pop_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "DELETE FROM research_delayed_jobs
             WHERE job_id IN (
                 SELECT job_id FROM research_delayed_jobs
                 WHERE due_at <= $1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING job_id, due_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        let mut due = rows
            .into_iter()
            .map(|row| {
                Ok((
                    row.try_get::<DateTime<Utc>, _>("due_at")?,
                    row.try_get::<Uuid, _>("job_id")?,
                ))
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        due.sort();
        Ok(due.into_iter().map(|(_, id)| id).collect())
    }

    async fn promote_due(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        // One statement: a due id is never observable in neither structure.
        let promoted: Vec<Uuid> = sqlx::query_scalar(
            "WITH due AS (
                 DELETE FROM research_delayed_jobs
                 WHERE job_id IN (
                     SELECT job_id FROM research_delayed_jobs
                     WHERE due_at <= $1
                     FOR UPDATE SKIP LOCKED
                 )
                 RETURNING job_id, due_at
             ), moved AS (
                 INSERT INTO research_ready_queue (job_id)
                 SELECT job_id FROM due ORDER BY due_at, job_id
                 ON CONFLICT (job_id) DO NOTHING
             )
             SELECT job_id FROM due ORDER BY due_at, job_id",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        if !promoted.is_empty() {
            debug!(promoted = promoted.len(), "Promoted due jobs");
            self.notify.notify_waiters();
        }
        Ok(promoted)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let ready = sqlx::query("DELETE FROM research_ready_queue WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let delayed = sqlx::query("DELETE FROM research_delayed_jobs WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(ready + delayed > 0)
    }

    async fn location(&self, id: Uuid) -> Result<Option<QueueLocation>> {
        let location: Option<String> = sqlx::query_scalar(
            "SELECT CASE
                 WHEN EXISTS(SELECT 1 FROM research_ready_queue WHERE job_id = $1) THEN 'ready'
                 WHEN EXISTS(SELECT 1 FROM research_delayed_jobs WHERE job_id = $1) THEN 'delayed'
             END",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;

        match location.as_deref() {
            None => Ok(None),
            Some("ready") => Ok(Some(QueueLocation::Ready)),
            Some("delayed") => Ok(Some(QueueLocation::Delayed)),
            Some(other) => Err(Error::Queue(format!("unexpected location '{}'", other))),
        }
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let row = sqlx::query(
            "SELECT (SELECT COUNT(*) FROM research_ready_queue) AS ready,
                    (SELECT COUNT(*) FROM research_delayed_jobs) AS delayed",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(QueueDepth {
            ready: row.try_get("ready")?,
            delayed: row.try_get("delayed")?,
        })
    }
}
