//! Progress relay: one task per submitted job, feeding the worker's
//! progress stream into the lifecycle manager.
//!
//! A stream that errors or closes before the job finishes is reopened
//! with backoff, at most `max_retries` times in a row; a stream that
//! delivered frames restores the full budget. The relay stops once the job
//! is terminal, once the worker reports a terminal frame, or on shutdown.

use std::sync::Arc;

use epdd_algo::retry::{next_delay, RetryPolicy};
use epdd_algo::{ProgressFrame, WorkerRpc};
use epdd_core::types::JobId;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::lifecycle::{JobLifecycle, Transition};

/// Why a relay task ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayExit {
    /// A terminal frame was applied (or found the job already terminal).
    Finalized(Transition),
    /// The job was terminal before the stream produced a terminal frame.
    AlreadyTerminal,
    /// The worker reported 100% without a terminal status; the result
    /// callback will finalize the job.
    Completed,
    /// Reconnect attempts were exhausted.
    GaveUp,
    Cancelled,
}

/// What to do after handling one frame.
enum Step {
    Continue,
    Exit(RelayExit),
}

pub struct ProgressRelay {
    rpc: Arc<dyn WorkerRpc>,
    lifecycle: Arc<JobLifecycle>,
    policy: RetryPolicy,
}

impl ProgressRelay {
    pub fn new(rpc: Arc<dyn WorkerRpc>, lifecycle: Arc<JobLifecycle>, policy: RetryPolicy) -> Self {
        Self {
            rpc,
            lifecycle,
            policy,
        }
    }

    /// Relay progress for `job_id` until it finishes or `cancel` fires.
    pub async fn run(&self, job_id: JobId, cancel: CancellationToken) -> RelayExit {
        let mut delay = self.policy.initial_backoff;
        let mut reconnects = 0u32;

        loop {
            match self.lifecycle.is_finished(&job_id).await {
                Ok(true) => return RelayExit::AlreadyTerminal,
                Ok(false) => {}
                Err(PipelineError::NotFound(_)) => {
                    tracing::warn!(job_id = %job_id, "Relay stopped: job no longer exists");
                    return RelayExit::GaveUp;
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Relay could not read job state");
                }
            }

            let opened = tokio::select! {
                _ = cancel.cancelled() => return RelayExit::Cancelled,
                opened = self.rpc.watch_progress(&job_id) => opened,
            };

            let mut delivered = false;
            match opened {
                Ok(mut frames) => loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return RelayExit::Cancelled,
                        next = frames.next() => next,
                    };
                    match next {
                        Some(Ok(frame)) => {
                            delivered = true;
                            if let Step::Exit(exit) = self.handle_frame(&job_id, &frame).await {
                                return exit;
                            }
                        }
                        Some(Err(e)) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Progress stream failed");
                            break;
                        }
                        None => {
                            tracing::debug!(job_id = %job_id, "Progress stream closed");
                            break;
                        }
                    }
                },
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Failed to open progress stream");
                }
            }

            if delivered {
                reconnects = 0;
                delay = self.policy.initial_backoff;
            }
            reconnects += 1;
            if reconnects > self.policy.max_retries {
                tracing::warn!(
                    job_id = %job_id,
                    attempts = reconnects,
                    "Giving up on progress stream",
                );
                return RelayExit::GaveUp;
            }

            tokio::select! {
                _ = cancel.cancelled() => return RelayExit::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = next_delay(delay, &self.policy);
        }
    }

    async fn handle_frame(&self, job_id: &str, frame: &ProgressFrame) -> Step {
        if frame.task_id != job_id {
            tracing::warn!(
                job_id = %job_id,
                frame_task_id = %frame.task_id,
                "Dropping frame for another task",
            );
            return Step::Continue;
        }

        if let Some(report) = frame.report() {
            return match self.lifecycle.apply_report(job_id, &report).await {
                Ok(transition) => Step::Exit(RelayExit::Finalized(transition)),
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Failed to finalize job");
                    Step::Continue
                }
            };
        }

        if let Err(e) = self.lifecycle.record_progress(&frame.to_event()).await {
            tracing::error!(job_id = %job_id, error = %e, "Failed to record progress");
        }

        if frame.is_last() {
            Step::Exit(RelayExit::Completed)
        } else {
            Step::Continue
        }
    }
}
