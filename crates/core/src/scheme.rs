use serde::{Deserialize, Serialize};

/// Capability descriptor advertised by the remote worker.
///
/// Read-mostly reference data: cached by the lifecycle manager and
/// refreshed wholesale, never mutated locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scheme {
    /// Model grouping, e.g. `"KBM"`.
    pub model: String,
    /// Unique scheme code, e.g. `"KBM-WF01"`.
    pub code: String,
    pub name: String,
    pub class_name: String,
    /// Resource-type hint (`"cpu"`, `"gpu"`, ...).
    pub resource_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_params: Vec<String>,
}
