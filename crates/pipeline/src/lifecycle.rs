//! Job lifecycle state machine.
//!
//! [`JobLifecycle`] is the single writer of job state. Every mutation goes
//! through the durable store first; only after it has been applied is the
//! cached progress snapshot refreshed and an envelope published to the
//! broadcast hub. Terminal jobs are immutable: late progress and repeated
//! terminal reports are acknowledged as no-ops.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use epdd_core::job_events::{
    WsEnvelope, MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_ERROR, MSG_TYPE_JOB_PROGRESS,
    MSG_TYPE_JOB_RESULT,
};
use epdd_core::progress::ProgressEvent;
use epdd_core::report::{ResultSummary, WorkerReport};
use epdd_core::scheme::Scheme;
use epdd_core::types::JobId;
use epdd_db::cache::{get_json, set_json, CacheError, SharedCache};
use epdd_db::models::job::{Job, JobFilter, JobPage, JobStats, NewJob};
use epdd_db::models::status::JobStatus;
use epdd_db::store::{JobStore, StoreError};
use epdd_events::BroadcastHub;
use serde_json::json;

use crate::error::PipelineError;

/// Error log written by the zombie sweep.
pub const ZOMBIE_ERROR_LOG: &str = "Task timeout - marked as zombie";

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Deadline on every store call.
    pub store_timeout: Duration,
    /// Deadline on every cache call.
    pub cache_timeout: Duration,
    pub progress_ttl: Duration,
    pub scheme_ttl: Duration,
    /// Prefix of the per-job progress snapshot key.
    pub progress_key_ns: String,
    pub scheme_cache_key: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            store_timeout: Duration::from_secs(10),
            cache_timeout: Duration::from_secs(3),
            progress_ttl: Duration::from_secs(10 * 60),
            scheme_ttl: Duration::from_secs(5 * 60),
            progress_key_ns: "job:progress:".to_string(),
            scheme_cache_key: "sys:algo:schemes".to_string(),
        }
    }
}

/// Outcome of a terminal transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied,
    /// The job had already reached this terminal status; nothing changed.
    AlreadyTerminal(JobStatus),
}

/// Outcome of [`JobLifecycle::record_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressOutcome {
    Recorded,
    /// The job is terminal; the event was dropped.
    Ignored(JobStatus),
}

pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    cache: Arc<dyn SharedCache>,
    hub: BroadcastHub,
    config: LifecycleConfig,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<dyn SharedCache>,
        hub: BroadcastHub,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            cache,
            hub,
            config,
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn SharedCache> {
        &self.cache
    }

    // ---- creation and progress ----

    /// Insert a new PENDING job.
    pub async fn create_job(&self, job: NewJob) -> Result<Job, PipelineError> {
        let created = self.with_store(self.store.insert(&job)).await?;
        tracing::info!(
            job_id = %created.job_id,
            scheme = %created.scheme_code,
            user_id = %created.user_id,
            "Job created",
        );
        Ok(created)
    }

    /// Fold a progress event into the job.
    ///
    /// Persist, then refresh the snapshot, then publish. A persist failure
    /// returns before either of the later steps runs.
    pub async fn record_progress(
        &self,
        event: &ProgressEvent,
    ) -> Result<ProgressOutcome, PipelineError> {
        let job = self.get_job(&event.job_id).await?;
        if job.status.is_terminal() {
            tracing::debug!(
                job_id = %event.job_id,
                status = %job.status,
                "Ignoring progress for finished job",
            );
            return Ok(ProgressOutcome::Ignored(job.status));
        }

        let percentage = event.clamped_percentage();
        let applied = self
            .with_store(self.store.update_progress(&event.job_id, percentage))
            .await?;
        if !applied {
            // A terminal writer got in between the read and the update.
            let status = self.get_job(&event.job_id).await?.status;
            return Ok(ProgressOutcome::Ignored(status));
        }

        let mut snapshot = event.clone();
        snapshot.percentage = percentage;

        let key = self.progress_key(&event.job_id);
        self.with_cache(
            "progress snapshot",
            set_json(&*self.cache, &key, &snapshot, self.config.progress_ttl),
        )
        .await;

        match serde_json::to_value(&snapshot) {
            Ok(payload) => {
                self.broadcast(&event.job_id, MSG_TYPE_JOB_PROGRESS, payload)
                    .await
            }
            Err(e) => {
                tracing::error!(job_id = %event.job_id, error = %e, "Failed to encode progress event")
            }
        }

        tracing::debug!(job_id = %event.job_id, percentage, "Progress recorded");
        Ok(ProgressOutcome::Recorded)
    }

    // ---- terminal transitions ----

    pub async fn finish_job(
        &self,
        job_id: &str,
        result: &ResultSummary,
    ) -> Result<Transition, PipelineError> {
        let value = result.to_value();
        let applied = self.with_store(self.store.finish(job_id, &value)).await?;
        self.settle(
            job_id,
            applied,
            MSG_TYPE_JOB_RESULT,
            json!({ "status": JobStatus::Success, "result": value }),
        )
        .await
    }

    pub async fn fail_job(
        &self,
        job_id: &str,
        error_log: &str,
    ) -> Result<Transition, PipelineError> {
        let applied = self.with_store(self.store.fail(job_id, error_log)).await?;
        self.settle(
            job_id,
            applied,
            MSG_TYPE_JOB_ERROR,
            json!({ "status": JobStatus::Failed, "error": error_log }),
        )
        .await
    }

    pub async fn cancel_job(
        &self,
        job_id: &str,
        message: &str,
    ) -> Result<Transition, PipelineError> {
        let applied = self.with_store(self.store.cancel(job_id, message)).await?;
        self.settle(
            job_id,
            applied,
            MSG_TYPE_JOB_CANCELLED,
            json!({ "status": JobStatus::Cancelled, "message": message }),
        )
        .await
    }

    /// Apply a terminal report from the worker.
    pub async fn apply_report(
        &self,
        job_id: &str,
        report: &WorkerReport,
    ) -> Result<Transition, PipelineError> {
        match report {
            WorkerReport::Success { result } => self.finish_job(job_id, result).await,
            WorkerReport::Failed { error_message } => self.fail_job(job_id, error_message).await,
        }
    }

    /// Publish after an applied transition, or explain why nothing changed.
    async fn settle(
        &self,
        job_id: &str,
        applied: bool,
        msg_type: &str,
        payload: serde_json::Value,
    ) -> Result<Transition, PipelineError> {
        if applied {
            tracing::info!(job_id = %job_id, event = msg_type, "Job reached terminal state");
            self.broadcast(job_id, msg_type, payload).await;
            return Ok(Transition::Applied);
        }

        let status = self.get_job(job_id).await?.status;
        tracing::debug!(job_id = %job_id, status = %status, "Terminal transition skipped");
        Ok(Transition::AlreadyTerminal(status))
    }

    // ---- queries ----

    pub async fn get_job(&self, job_id: &str) -> Result<Job, PipelineError> {
        self.with_store(self.store.find(job_id))
            .await?
            .ok_or_else(|| PipelineError::NotFound(job_id.to_string()))
    }

    pub async fn is_finished(&self, job_id: &str) -> Result<bool, PipelineError> {
        Ok(self.get_job(job_id).await?.status.is_terminal())
    }

    pub async fn list_jobs(&self, filter: &JobFilter) -> Result<JobPage, PipelineError> {
        Ok(self.with_store(self.store.list(filter)).await?)
    }

    pub async fn stats(&self) -> Result<JobStats, PipelineError> {
        Ok(self.with_store(self.store.stats()).await?)
    }

    /// Latest cached progress event, if still within its TTL.
    pub async fn progress_snapshot(&self, job_id: &str) -> Option<ProgressEvent> {
        let key = self.progress_key(job_id);
        self.with_cache("progress snapshot", get_json(&*self.cache, &key))
            .await
            .flatten()
    }

    // ---- scheme cache ----

    pub async fn get_cached_schemes(&self) -> Option<Vec<Scheme>> {
        self.with_cache(
            "scheme list",
            get_json(&*self.cache, &self.config.scheme_cache_key),
        )
        .await
        .flatten()
    }

    pub async fn cache_schemes(&self, schemes: &[Scheme]) {
        self.with_cache(
            "scheme list",
            set_json(
                &*self.cache,
                &self.config.scheme_cache_key,
                schemes,
                self.config.scheme_ttl,
            ),
        )
        .await;
    }

    // ---- reconciliation ----

    /// Fail every RUNNING job that has not been touched for `timeout`.
    pub async fn sweep_zombies(&self, timeout: Duration) -> Result<Vec<JobId>, PipelineError> {
        let window = chrono::Duration::from_std(timeout)
            .map_err(|e| PipelineError::Validation(format!("zombie timeout out of range: {e}")))?;
        let cutoff = chrono::Utc::now() - window;

        let failed = self
            .with_store(self.store.fail_stale_running(cutoff, ZOMBIE_ERROR_LOG))
            .await?;
        for job_id in &failed {
            tracing::warn!(job_id = %job_id, "Job marked as zombie");
            self.broadcast(
                job_id,
                MSG_TYPE_JOB_ERROR,
                json!({ "status": JobStatus::Failed, "error": ZOMBIE_ERROR_LOG }),
            )
            .await;
        }
        Ok(failed)
    }

    /// Send an operational announcement to every connected observer.
    pub async fn announce(&self, payload: serde_json::Value) {
        match WsEnvelope::announcement(payload).encode() {
            Ok(bytes) => {
                if let Err(e) = self.hub.publish_all(bytes).await {
                    tracing::warn!(error = %e, "Failed to publish announcement");
                }
            }
            Err(e) => tracing::error!(error = %e, "Failed to encode announcement"),
        }
    }

    // ---- private helpers ----

    fn progress_key(&self, job_id: &str) -> String {
        format!("{}{}", self.config.progress_key_ns, job_id)
    }

    async fn with_store<T>(
        &self,
        call: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        let limit = self.config.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .map_err(|_| StoreError::Timeout(limit))?
    }

    /// Run a cache call under its deadline. Failures are logged and
    /// reported as `None`.
    async fn with_cache<T>(
        &self,
        what: &'static str,
        call: impl Future<Output = Result<T, CacheError>>,
    ) -> Option<T> {
        let limit = self.config.cache_timeout;
        let outcome = match tokio::time::timeout(limit, call).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(limit)),
        };
        match outcome {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(cache = what, error = %e, "Cache call failed");
                None
            }
        }
    }

    async fn broadcast(&self, job_id: &str, msg_type: &str, payload: serde_json::Value) {
        let bytes = match WsEnvelope::for_job(msg_type, job_id, payload).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to encode envelope");
                return;
            }
        };
        if let Err(e) = self.hub.publish(job_id, bytes).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to publish to hub");
        }
    }
}
