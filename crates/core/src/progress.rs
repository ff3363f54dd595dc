//! Progress events reported by the remote worker.
//!
//! A [`ProgressEvent`] is never persisted as its own entity: the lifecycle
//! manager folds it into the job row and pushes it to the broadcast hub.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{JobId, Timestamp};

/// Lowest valid progress percentage.
pub const MIN_PERCENTAGE: i32 = 0;

/// Highest valid progress percentage.
pub const MAX_PERCENTAGE: i32 = 100;

/// Clamp a raw percentage reported by the worker into `0..=100`.
pub fn clamp_percentage(raw: i32) -> i32 {
    raw.clamp(MIN_PERCENTAGE, MAX_PERCENTAGE)
}

/// A point-in-time progress update for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub job_id: JobId,
    /// Reported percentage. Expected to be non-decreasing but not enforced.
    pub percentage: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metrics: BTreeMap<String, String>,
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    /// Create an event stamped with the current time.
    pub fn new(job_id: impl Into<JobId>, percentage: i32, message: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            percentage,
            message: message.into(),
            stage: None,
            metrics: BTreeMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    /// Attach a stage label (e.g. `"validating"`).
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Attach one metric key/value pair.
    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }

    /// Override the timestamp (used when relaying worker-stamped frames).
    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// The percentage clamped into the valid range.
    pub fn clamped_percentage(&self) -> i32 {
        clamp_percentage(self.percentage)
    }
}
