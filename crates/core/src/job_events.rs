//! WebSocket message types pushed to progress observers.
//!
//! Every payload the lifecycle manager hands to the broadcast hub is a
//! JSON-encoded [`WsEnvelope`] whose `type` is one of the constants below.

use serde::{Deserialize, Serialize};

use crate::types::JobId;

/// Progress update during job execution.
pub const MSG_TYPE_JOB_PROGRESS: &str = "progress";

/// Job completed successfully; payload carries the result summary.
pub const MSG_TYPE_JOB_RESULT: &str = "result";

/// Job failed; payload carries the error log.
pub const MSG_TYPE_JOB_ERROR: &str = "error";

/// Job was cancelled (by user or system).
pub const MSG_TYPE_JOB_CANCELLED: &str = "cancelled";

/// Final job snapshot sent once to a late subscriber of a finished job.
pub const MSG_TYPE_JOB_SNAPSHOT: &str = "snapshot";

/// Operational announcement sent to every connected observer.
pub const MSG_TYPE_ANNOUNCEMENT: &str = "announcement";

/// Envelope for all messages sent to progress observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WsEnvelope {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Unix epoch milliseconds.
    pub timestamp: i64,
}

impl WsEnvelope {
    /// Build an envelope addressed to the observers of one job.
    pub fn for_job(
        msg_type: &str,
        job_id: impl Into<JobId>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            job_id: Some(job_id.into()),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Build an announcement envelope that is not tied to any job.
    pub fn announcement(payload: serde_json::Value) -> Self {
        Self {
            msg_type: MSG_TYPE_ANNOUNCEMENT.to_string(),
            job_id: None,
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
