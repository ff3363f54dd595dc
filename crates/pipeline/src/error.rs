use epdd_algo::RpcError;
use epdd_core::types::JobId;
use epdd_db::models::status::JobStatus;
use epdd_db::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Job {job_id} is not completed (status: {status})")]
    NotCompleted { job_id: JobId, status: JobStatus },

    #[error("Job {job_id} is already {status} and cannot be cancelled")]
    NotCancellable { job_id: JobId, status: JobStatus },

    #[error("Duplicate request: idempotency key {0} was already used")]
    Duplicate(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

impl From<epdd_core::error::CoreError> for PipelineError {
    fn from(err: epdd_core::error::CoreError) -> Self {
        match err {
            epdd_core::error::CoreError::Validation(msg) => PipelineError::Validation(msg),
            other => PipelineError::Validation(other.to_string()),
        }
    }
}
