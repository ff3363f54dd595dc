//! Repository for the `algo_jobs` table.
//!
//! Terminal transitions use `status_id NOT IN (terminal)` guards and
//! report `rows_affected() > 0`, so racing writers resolve in the database.

use async_trait::async_trait;
use epdd_core::types::{JobId, Timestamp};
use sqlx::PgPool;

use crate::models::job::{Job, JobFilter, JobPage, JobStats, NewJob};
use crate::models::status::{JobStatus, TERMINAL_STATUSES};
use crate::store::{JobStore, StoreError};

/// Column list for `algo_jobs` queries.
const COLUMNS: &str = "\
    job_id, scheme_code, user_id, status_id, progress, data_ref, params, \
    result_summary, error_log, created_at, updated_at, finished_at";

/// Guard fragment shared by every terminal transition. Binds `$2..$4`.
const NOT_TERMINAL: &str = "status_id NOT IN ($2, $3, $4)";

/// [`JobStore`] backed by PostgreSQL.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run a guarded terminal update whose extra binds start at `$5`.
    async fn guarded_update(
        &self,
        job_id: &str,
        set_clause: &str,
        binds: TerminalBinds<'_>,
    ) -> Result<bool, StoreError> {
        let query = format!(
            "UPDATE algo_jobs SET {set_clause}, updated_at = NOW() \
             WHERE job_id = $1 AND {NOT_TERMINAL}"
        );
        let mut q = sqlx::query(&query)
            .bind(job_id)
            .bind(TERMINAL_STATUSES[0])
            .bind(TERMINAL_STATUSES[1])
            .bind(TERMINAL_STATUSES[2]);
        q = match binds {
            TerminalBinds::Finish(result) => q.bind(JobStatus::Success).bind(result),
            TerminalBinds::Message(status, message) => q.bind(status).bind(message),
        };
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }
}

enum TerminalBinds<'a> {
    Finish(&'a serde_json::Value),
    Message(JobStatus, &'a str),
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError> {
        let query = format!(
            "INSERT INTO algo_jobs (job_id, scheme_code, user_id, status_id, data_ref, params) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        let inserted = sqlx::query_as::<_, Job>(&query)
            .bind(&job.job_id)
            .bind(&job.scheme_code)
            .bind(&job.user_id)
            .bind(JobStatus::Pending)
            .bind(&job.data_ref)
            .bind(&job.params)
            .fetch_one(&self.pool)
            .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StoreError::Duplicate(job.job_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find(&self, job_id: &str) -> Result<Option<Job>, StoreError> {
        let query = format!("SELECT {COLUMNS} FROM algo_jobs WHERE job_id = $1");
        let job = sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn update_progress(&self, job_id: &str, percentage: i32) -> Result<bool, StoreError> {
        let query = format!(
            "UPDATE algo_jobs SET progress = $5, status_id = $6, updated_at = NOW() \
             WHERE job_id = $1 AND {NOT_TERMINAL}"
        );
        let result = sqlx::query(&query)
            .bind(job_id)
            .bind(TERMINAL_STATUSES[0])
            .bind(TERMINAL_STATUSES[1])
            .bind(TERMINAL_STATUSES[2])
            .bind(percentage.clamp(0, 100))
            .bind(JobStatus::Running)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn finish(&self, job_id: &str, result: &serde_json::Value) -> Result<bool, StoreError> {
        self.guarded_update(
            job_id,
            "status_id = $5, result_summary = $6, progress = 100, finished_at = NOW()",
            TerminalBinds::Finish(result),
        )
        .await
    }

    async fn fail(&self, job_id: &str, error_log: &str) -> Result<bool, StoreError> {
        self.guarded_update(
            job_id,
            "status_id = $5, error_log = $6, finished_at = NOW()",
            TerminalBinds::Message(JobStatus::Failed, error_log),
        )
        .await
    }

    async fn cancel(&self, job_id: &str, reason: &str) -> Result<bool, StoreError> {
        self.guarded_update(
            job_id,
            "status_id = $5, error_log = $6, finished_at = NOW()",
            TerminalBinds::Message(JobStatus::Cancelled, reason),
        )
        .await
    }

    async fn list(&self, filter: &JobFilter) -> Result<JobPage, StoreError> {
        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 1;

        let user_id = filter.user_id.as_deref().filter(|u| !u.is_empty());
        if user_id.is_some() {
            conditions.push(format!("user_id = ${bind_idx}"));
            bind_idx += 1;
        }
        if filter.status.is_some() {
            conditions.push(format!("status_id = ${bind_idx}"));
            bind_idx += 1;
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_query = format!("SELECT COUNT(*) FROM algo_jobs {where_clause}");
        let mut count_q = sqlx::query_scalar::<_, i64>(&count_query);
        if let Some(uid) = user_id {
            count_q = count_q.bind(uid);
        }
        if let Some(status) = filter.status {
            count_q = count_q.bind(status);
        }
        let total = count_q.fetch_one(&self.pool).await?;

        let query = format!(
            "SELECT {COLUMNS} FROM algo_jobs \
             {where_clause} \
             ORDER BY created_at DESC \
             LIMIT ${bind_idx} OFFSET ${}",
            bind_idx + 1,
        );
        let mut q = sqlx::query_as::<_, Job>(&query);
        if let Some(uid) = user_id {
            q = q.bind(uid);
        }
        if let Some(status) = filter.status {
            q = q.bind(status);
        }
        q = q.bind(filter.page_size()).bind(filter.offset());

        let items = q.fetch_all(&self.pool).await?;
        Ok(JobPage::new(items, total, filter))
    }

    async fn fail_stale_running(
        &self,
        cutoff: Timestamp,
        error_log: &str,
    ) -> Result<Vec<JobId>, StoreError> {
        let ids = sqlx::query_scalar::<_, JobId>(
            "UPDATE algo_jobs \
             SET status_id = $1, error_log = $2, finished_at = NOW(), updated_at = NOW() \
             WHERE status_id = $3 AND updated_at < $4 \
             RETURNING job_id",
        )
        .bind(JobStatus::Failed)
        .bind(error_log)
        .bind(JobStatus::Running)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn stats(&self) -> Result<JobStats, StoreError> {
        let counts = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status_id, COUNT(*) FROM algo_jobs GROUP BY status_id",
        )
        .fetch_all(&self.pool)
        .await?;

        let avg = sqlx::query_scalar::<_, f64>(
            "SELECT COALESCE(AVG(EXTRACT(EPOCH FROM finished_at - created_at)), 0)::FLOAT8 \
             FROM algo_jobs WHERE status_id = $1 AND finished_at IS NOT NULL",
        )
        .bind(JobStatus::Success)
        .fetch_one(&self.pool)
        .await?;

        Ok(JobStats::from_counts(counts, avg))
    }

    async fn ping(&self) -> Result<(), StoreError> {
        crate::health_check(&self.pool).await?;
        Ok(())
    }
}
