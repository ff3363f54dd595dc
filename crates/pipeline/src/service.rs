//! Gateway-facing job operations.
//!
//! [`JobService`] composes the lifecycle manager, the worker client and
//! the idempotency guard, and owns the progress relay tasks it spawns.

use std::sync::Arc;
use std::time::Duration;

use epdd_algo::retry::RetryPolicy;
use epdd_algo::{SubmitTask, WorkerRpc};
use epdd_core::report::WorkerReport;
use epdd_core::scheme::Scheme;
use epdd_core::submission::SubmitJob;
use epdd_core::types::{new_job_id, JobId};
use epdd_db::models::job::{Job, JobFilter, JobPage, JobStats, NewJob};
use epdd_db::models::status::JobStatus;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::error::PipelineError;
use crate::guard::IdempotencyGuard;
use crate::lifecycle::{JobLifecycle, Transition};
use crate::relay::ProgressRelay;

/// Error log prefix for jobs the worker refused or never received.
const SUBMIT_FAILED_PREFIX: &str = "Failed to submit to algorithm service";

/// Error log for jobs cancelled through the API.
pub const CANCELLED_BY_USER: &str = "Cancelled by user";

/// How long [`JobService::shutdown`] waits for relays to stop.
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubmitReceipt {
    pub job_id: JobId,
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CancelOutcome {
    pub job_id: JobId,
    /// Whether the worker accepted the cancel request.
    pub success: bool,
    pub message: String,
    pub force: bool,
    /// Local status after the request.
    pub status: JobStatus,
}

/// Reply to a worker result callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportAck {
    Accepted,
    /// The job was already terminal; the report was not reprocessed.
    AlreadyFinished,
}

pub struct JobService {
    lifecycle: Arc<JobLifecycle>,
    rpc: Arc<dyn WorkerRpc>,
    idempotency: IdempotencyGuard,
    relay_policy: RetryPolicy,
    relays: TaskTracker,
    cancel: CancellationToken,
}

impl JobService {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        rpc: Arc<dyn WorkerRpc>,
        idempotency: IdempotencyGuard,
        relay_policy: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            lifecycle,
            rpc,
            idempotency,
            relay_policy,
            relays: TaskTracker::new(),
            cancel,
        }
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        &self.lifecycle
    }

    pub fn rpc(&self) -> &Arc<dyn WorkerRpc> {
        &self.rpc
    }

    /// Number of progress relays still running.
    pub fn active_relays(&self) -> usize {
        self.relays.len()
    }

    /// Validate, record and dispatch a new job.
    ///
    /// When the worker cannot be reached the job is kept as FAILED and the
    /// worker error is returned.
    pub async fn submit(
        &self,
        request: SubmitJob,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitReceipt, PipelineError> {
        let request = request.validated()?;
        self.check_scheme(&request).await?;

        if let Some(key) = idempotency_key {
            self.idempotency.claim(key).await?;
        }

        let job_id = new_job_id();
        self.lifecycle
            .create_job(NewJob {
                job_id: job_id.clone(),
                scheme_code: request.scheme.clone(),
                user_id: request.user_id.clone(),
                data_ref: request.data_id.clone(),
                params: request.params.clone(),
            })
            .await?;

        let task = SubmitTask {
            task_id: job_id.clone(),
            scheme_code: request.scheme,
            data_ref: request.data_id,
            params: request.params,
        };
        if let Err(e) = self.rpc.submit(&task).await {
            tracing::error!(job_id = %job_id, error = %e, "Worker rejected job");
            let error_log = format!("{SUBMIT_FAILED_PREFIX}: {e}");
            if let Err(fail_err) = self.lifecycle.fail_job(&job_id, &error_log).await {
                tracing::error!(job_id = %job_id, error = %fail_err, "Failed to mark job as failed");
            }
            return Err(e.into());
        }

        self.spawn_relay(job_id.clone());
        tracing::info!(job_id = %job_id, scheme = %task.scheme_code, "Job submitted");

        Ok(SubmitReceipt {
            job_id,
            status: JobStatus::Pending,
        })
    }

    /// Ask the worker to stop a job and mark it CANCELLED once it has.
    pub async fn cancel(&self, job_id: &str, force: bool) -> Result<CancelOutcome, PipelineError> {
        let job = self.lifecycle.get_job(job_id).await?;
        if job.status.is_terminal() {
            return Err(PipelineError::NotCancellable {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }

        let response = self.rpc.cancel(job_id, force).await?;
        let stopped = response.is_stopped() || (force && response.accepted);

        let status = if stopped {
            match self.lifecycle.cancel_job(job_id, CANCELLED_BY_USER).await? {
                Transition::Applied => JobStatus::Cancelled,
                Transition::AlreadyTerminal(status) => status,
            }
        } else {
            tracing::info!(
                job_id = %job_id,
                worker_status = %response.status,
                "Worker did not stop job",
            );
            job.status
        };

        Ok(CancelOutcome {
            job_id: job_id.to_string(),
            success: response.accepted,
            message: response.message,
            force,
            status,
        })
    }

    /// Result summary of a successful job.
    pub async fn result(&self, job_id: &str) -> Result<serde_json::Value, PipelineError> {
        let job = self.lifecycle.get_job(job_id).await?;
        if job.status != JobStatus::Success {
            return Err(PipelineError::NotCompleted {
                job_id: job_id.to_string(),
                status: job.status,
            });
        }
        Ok(job.result_summary.unwrap_or(serde_json::Value::Null))
    }

    /// Available schemes, from cache when possible.
    pub async fn schemes(&self) -> Result<Vec<Scheme>, PipelineError> {
        if let Some(schemes) = self.lifecycle.get_cached_schemes().await {
            return Ok(schemes);
        }
        let schemes = self.rpc.list_schemes().await?;
        self.lifecycle.cache_schemes(&schemes).await;
        Ok(schemes)
    }

    /// Handle the worker's result callback.
    pub async fn report_result(
        &self,
        job_id: &str,
        report: &WorkerReport,
    ) -> Result<ReportAck, PipelineError> {
        if self.lifecycle.is_finished(job_id).await? {
            tracing::info!(job_id = %job_id, "Result callback for finished job acknowledged");
            return Ok(ReportAck::AlreadyFinished);
        }
        match self.lifecycle.apply_report(job_id, report).await? {
            Transition::Applied => Ok(ReportAck::Accepted),
            Transition::AlreadyTerminal(_) => Ok(ReportAck::AlreadyFinished),
        }
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, PipelineError> {
        self.lifecycle.get_job(job_id).await
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, PipelineError> {
        self.lifecycle.list_jobs(filter).await
    }

    pub async fn stats(&self) -> Result<JobStats, PipelineError> {
        self.lifecycle.stats().await
    }

    /// Stop all relays and wait briefly for them to exit.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.relays.close();
        if tokio::time::timeout(RELAY_DRAIN_TIMEOUT, self.relays.wait())
            .await
            .is_err()
        {
            tracing::warn!(remaining = self.relays.len(), "Progress relays did not stop in time");
        }
    }

    // ---- private helpers ----

    /// Reject unknown schemes and missing required parameters, when the
    /// scheme list is cached. Without a cached list the worker decides.
    async fn check_scheme(&self, request: &SubmitJob) -> Result<(), PipelineError> {
        let Some(schemes) = self.lifecycle.get_cached_schemes().await else {
            return Ok(());
        };
        let scheme = schemes
            .iter()
            .find(|s| s.code == request.scheme)
            .ok_or_else(|| PipelineError::Validation(format!("unknown scheme: {}", request.scheme)))?;

        let missing: Vec<&str> = scheme
            .required_params
            .iter()
            .filter(|name| request.params.get(name.as_str()).is_none())
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Validation(format!(
                "missing required params for {}: {}",
                scheme.code,
                missing.join(", ")
            )));
        }
        Ok(())
    }

    fn spawn_relay(&self, job_id: JobId) {
        let relay = ProgressRelay::new(
            self.rpc.clone(),
            self.lifecycle.clone(),
            self.relay_policy.clone(),
        );
        let cancel = self.cancel.child_token();
        self.relays.spawn(async move {
            let exit = relay.run(job_id.clone(), cancel).await;
            tracing::debug!(job_id = %job_id, exit = ?exit, "Progress relay finished");
        });
    }
}
