//! Terminal results reported by the worker.
//!
//! The worker's result payloads are scheme specific. They are modelled
//! as a tagged union so the success and failure shapes cannot be mixed
//! up, while [`ResultSummary`] keeps any extra fields as opaque JSON.

use serde::{Deserialize, Serialize};

/// Structured summary of a successful job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultSummary {
    /// Scheme-specific result value.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    /// Any other top-level fields, passed through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultSummary {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            extra: serde_json::Map::new(),
        }
    }

    /// Interpret an arbitrary JSON value as a summary.
    ///
    /// Objects are split into `payload` plus passthrough fields; any other
    /// value becomes the payload itself.
    pub fn from_value(value: serde_json::Value) -> Self {
        if value.is_object() {
            if let Ok(summary) = serde_json::from_value::<ResultSummary>(value.clone()) {
                return summary;
            }
        }
        Self::new(value)
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Terminal report delivered by the worker's result callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerReport {
    Success {
        #[serde(default)]
        result: ResultSummary,
    },
    Failed {
        #[serde(default)]
        error_message: String,
    },
}
