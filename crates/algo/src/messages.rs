//! Wire types exchanged with the algorithm worker.
//!
//! Unary responses are plain JSON bodies. Progress frames arrive as
//! WebSocket text messages with the shape
//! `{"task_id": "...", "percentage": 40, "message": "...", ...}`; the last
//! frame of a task may carry a terminal `status` with its result or error.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use epdd_core::progress::ProgressEvent;
use epdd_core::report::{ResultSummary, WorkerReport};
use epdd_core::scheme::Scheme;
use epdd_core::types::JobId;
use serde::{Deserialize, Serialize};

/// Body of `POST /tasks`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitTask {
    /// The job id doubles as the worker's task id; resubmission with the
    /// same id is idempotent on the worker side.
    pub task_id: JobId,
    pub scheme_code: String,
    pub data_ref: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Generic acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Body of `GET /schemes`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemeList {
    #[serde(default)]
    pub schemes: Vec<Scheme>,
}

/// Body of `POST /tasks/{id}/cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTask {
    pub force: bool,
}

/// Worker reply to a cancellation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelResponse {
    #[serde(alias = "success")]
    pub accepted: bool,
    #[serde(default)]
    pub message: String,
    /// Worker-side task status after the request, e.g. `CANCELLED`,
    /// `KILLED` or `RUNNING`.
    #[serde(default)]
    pub status: String,
}

impl CancelResponse {
    /// Whether the worker reports the task as stopped.
    pub fn is_stopped(&self) -> bool {
        matches!(self.status.as_str(), "CANCELLED" | "KILLED")
    }
}

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// `SERVING`, `NOT_SERVING` or `UNKNOWN`.
    pub status: String,
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,
}

impl HealthStatus {
    pub fn is_serving(&self) -> bool {
        self.status == "SERVING"
    }
}

/// Terminal marker on a progress frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameStatus {
    Running,
    Success,
    Failed,
}

/// One message on the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressFrame {
    pub task_id: JobId,
    pub percentage: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, String>,
    /// Unix epoch milliseconds; `0` means "not stamped".
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<FrameStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressFrame {
    /// Convert to the domain progress event.
    pub fn to_event(&self) -> ProgressEvent {
        let mut event = ProgressEvent::new(self.task_id.clone(), self.percentage, self.message.clone());
        event.stage = self.stage.clone();
        event.metrics = self.metrics.clone();
        if self.timestamp > 0 {
            if let Some(ts) = Utc.timestamp_millis_opt(self.timestamp).single() {
                event = event.with_timestamp(ts);
            }
        }
        event
    }

    /// The terminal report carried by this frame, if any.
    pub fn report(&self) -> Option<WorkerReport> {
        match self.status? {
            FrameStatus::Running => None,
            FrameStatus::Success => Some(WorkerReport::Success {
                result: self
                    .result
                    .clone()
                    .map(ResultSummary::from_value)
                    .unwrap_or_default(),
            }),
            FrameStatus::Failed => Some(WorkerReport::Failed {
                error_message: self.error.clone().unwrap_or_else(|| self.message.clone()),
            }),
        }
    }

    /// Whether the worker will send nothing further for this task.
    pub fn is_last(&self) -> bool {
        self.percentage >= 100 || self.report().is_some()
    }
}

/// Parse a progress stream text message.
pub fn parse_frame(text: &str) -> Result<ProgressFrame, serde_json::Error> {
    serde_json::from_str(text)
}
