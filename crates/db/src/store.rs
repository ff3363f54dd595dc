//! The durable job store seam.

use std::time::Duration;

use async_trait::async_trait;
use epdd_core::types::{JobId, Timestamp};

use crate::models::job::{Job, JobFilter, JobPage, JobStats, NewJob};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Job already exists: {0}")]
    Duplicate(JobId),

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Operations the lifecycle manager needs from durable storage.
///
/// Every terminal write is guarded: it only applies while the row is
/// still non-terminal and reports whether it did, so concurrent writers
/// can never overwrite a finished job.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a PENDING row. Fails with [`StoreError::Duplicate`] on an
    /// existing id.
    async fn insert(&self, job: &NewJob) -> Result<Job, StoreError>;

    async fn find(&self, job_id: &str) -> Result<Option<Job>, StoreError>;

    /// Record a progress percentage and promote PENDING to RUNNING.
    /// Returns `false` when the job is missing or already terminal.
    async fn update_progress(&self, job_id: &str, percentage: i32) -> Result<bool, StoreError>;

    /// Move to SUCCESS with the result summary and progress 100.
    async fn finish(&self, job_id: &str, result: &serde_json::Value) -> Result<bool, StoreError>;

    /// Move to FAILED with an error log.
    async fn fail(&self, job_id: &str, error_log: &str) -> Result<bool, StoreError>;

    /// Move to CANCELLED, keeping the reason in the error log.
    async fn cancel(&self, job_id: &str, reason: &str) -> Result<bool, StoreError>;

    async fn list(&self, filter: &JobFilter) -> Result<JobPage, StoreError>;

    /// Fail every RUNNING job whose `updated_at` is older than `cutoff`.
    /// Returns the ids that were transitioned.
    async fn fail_stale_running(
        &self,
        cutoff: Timestamp,
        error_log: &str,
    ) -> Result<Vec<JobId>, StoreError>;

    async fn stats(&self) -> Result<JobStats, StoreError>;

    /// Cheap connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
