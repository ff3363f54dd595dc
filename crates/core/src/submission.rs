//! Submission input accepted by the gateway.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Body of `POST /api/v1/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SubmitJob {
    /// Scheme code of the remote capability to invoke. Lengths follow the
    /// `algo_jobs` columns.
    #[validate(length(min = 1, max = 50))]
    pub scheme: String,
    /// Reference to the input data set.
    #[validate(length(min = 1, max = 255))]
    pub data_id: String,
    /// Scheme parameters; must be a JSON object when present.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Caller-supplied submitter identity.
    #[serde(default)]
    #[validate(length(max = 50))]
    pub user_id: String,
}

impl SubmitJob {
    /// Trim text fields, validate their lengths and normalise `params` to
    /// an object.
    pub fn validated(mut self) -> Result<Self, CoreError> {
        for field in [&mut self.scheme, &mut self.data_id, &mut self.user_id] {
            *field = field.trim().to_string();
        }
        self.validate()?;
        match &self.params {
            serde_json::Value::Null => {
                self.params = serde_json::Value::Object(Default::default());
            }
            serde_json::Value::Object(_) => {}
            _ => {
                return Err(CoreError::Validation(
                    "params must be a JSON object".into(),
                ))
            }
        }
        Ok(self)
    }
}
