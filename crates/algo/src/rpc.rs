use async_trait::async_trait;
use epdd_core::scheme::Scheme;
use futures::stream::BoxStream;

use crate::error::RpcError;
use crate::health::ConnectionState;
use crate::messages::{Ack, CancelResponse, HealthStatus, ProgressFrame, SubmitTask};

/// Ordered progress frames for one task. Ends on stream closure.
pub type ProgressFrames = BoxStream<'static, Result<ProgressFrame, RpcError>>;

/// The worker contract the orchestration core depends on.
#[async_trait]
pub trait WorkerRpc: Send + Sync {
    /// Available schemes. Retried on transient failure.
    async fn list_schemes(&self) -> Result<Vec<Scheme>, RpcError>;

    /// Hand a job to the worker. Retried; the worker dedupes by task id.
    async fn submit(&self, task: &SubmitTask) -> Result<Ack, RpcError>;

    /// Open the progress stream for a job. Never retried here; the
    /// caller decides whether to reopen.
    async fn watch_progress(&self, job_id: &str) -> Result<ProgressFrames, RpcError>;

    /// Ask the worker to stop a job. `force` kills it outright.
    async fn cancel(&self, job_id: &str, force: bool) -> Result<CancelResponse, RpcError>;

    /// Short, unretried health probe.
    async fn health(&self) -> Result<HealthStatus, RpcError>;

    /// Advisory connection state. Implementations without a live channel
    /// report `Ready`.
    fn connection_state(&self) -> ConnectionState {
        ConnectionState::Ready
    }
}
