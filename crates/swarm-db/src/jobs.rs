//! PostgreSQL job store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::{debug, trace};
use uuid::Uuid;

use swarm_core::{
    new_v7, CreateJobRequest, Error, Job, JobError, JobStats, JobStatus, JobStore, JobUpdate,
    Record, Result,
};

const JOB_COLUMNS: &str = "id, query, max_results, prompt_id, status, attempts, next_attempt_at, \
                           result, error, created_at, updated_at, finished_at";

/// PostgreSQL implementation of [`JobStore`].
///
/// Every state change is a single conditional `UPDATE`, so concurrent
/// workers and processes race safely on the row.
#[derive(Clone)]
pub struct PgJobStore {
    pool: Pool<Postgres>,
}

impl PgJobStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_status(s: &str) -> Result<JobStatus> {
        JobStatus::parse(s).ok_or_else(|| Error::Serialization(format!("unknown job status '{}'", s)))
    }

    fn parse_job_row(row: PgRow) -> Result<Job> {
        let status: String = row.try_get("status")?;
        let max_results: i32 = row.try_get("max_results")?;
        let attempts: i32 = row.try_get("attempts")?;
        let result: Option<JsonValue> = row.try_get("result")?;
        let error: Option<JsonValue> = row.try_get("error")?;

        Ok(Job {
            id: row.try_get("id")?,
            query: row.try_get("query")?,
            max_results: max_results.max(0) as u32,
            prompt_id: row.try_get("prompt_id")?,
            status: Self::parse_status(&status)?,
            attempts: attempts.max(0) as u32,
            next_attempt_at: row.try_get("next_attempt_at")?,
            result: result
                .map(serde_json::from_value::<Vec<Record>>)
                .transpose()?,
            error: error.map(serde_json::from_value::<JobError>).transpose()?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    async fn exists(&self, id: Uuid) -> Result<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM research_jobs WHERE id = $1)")
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, request: &CreateJobRequest) -> Result<Uuid> {
        let id = new_v7();
        let now = Utc::now();
        let max_results = i32::try_from(request.max_results)
            .map_err(|_| Error::InvalidInput("max_results out of range".to_string()))?;

        sqlx::query(
            "INSERT INTO research_jobs (id, query, max_results, prompt_id, status, attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'pending', 0, $5, $5)",
        )
        .bind(id)
        .bind(&request.query)
        .bind(max_results)
        .bind(&request.prompt_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %id, "Created research job");
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Job> {
        let row = sqlx::query(&format!("SELECT {} FROM research_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(Error::JobNotFound(id))?;
        Self::parse_job_row(row)
    }

    async fn compare_and_set(
        &self,
        id: Uuid,
        expected: &[JobStatus],
        update: JobUpdate,
    ) -> Result<bool> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let result = update.result.as_ref().map(serde_json::to_value).transpose()?;
        let error = update.error.as_ref().map(serde_json::to_value).transpose()?;
        let increment: i32 = if update.increment_attempts { 1 } else { 0 };

        let applied = sqlx::query(
            "UPDATE research_jobs
             SET status = $3,
                 attempts = attempts + $4,
                 next_attempt_at = $5,
                 result = $6,
                 error = $7,
                 updated_at = $8,
                 finished_at = CASE WHEN $9 THEN $8 ELSE finished_at END
             WHERE id = $1
               AND status = ANY($2)
               AND status NOT IN ('succeeded', 'failed')",
        )
        .bind(id)
        .bind(&expected)
        .bind(update.status.as_str())
        .bind(increment)
        .bind(update.next_attempt_at)
        .bind(result)
        .bind(error)
        .bind(Utc::now())
        .bind(update.status.is_terminal())
        .execute(&self.pool)
        .await?
        .rows_affected()
            > 0;

        if !applied {
            if !self.exists(id).await? {
                return Err(Error::JobNotFound(id));
            }
            trace!(job_id = %id, target = %update.status, "CAS rejected");
        }
        Ok(applied)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM research_jobs ORDER BY created_at DESC, id DESC LIMIT $1",
            JOB_COLUMNS
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Self::parse_job_row).collect()
    }

    async fn stats(&self) -> Result<JobStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM research_jobs GROUP BY status")
            .fetch_all(&self.pool)
            .await?;

        let mut stats = JobStats::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("n")?;
            stats.add(Self::parse_status(&status)?, count);
        }
        Ok(stats)
    }

    async fn prune_terminal(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = sqlx::query(
            "DELETE FROM research_jobs
             WHERE status IN ('succeeded', 'failed') AND finished_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if removed > 0 {
            debug!(removed, %cutoff, "Pruned terminal jobs");
        }
        Ok(removed)
    }
}
