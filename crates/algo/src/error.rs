use std::time::Duration;

/// Errors from calls to the remote worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RpcError {
    /// Connect failure, dropped connection, HTTP 429 or 5xx. Retried.
    #[error("Transient worker failure: {0}")]
    Transient(String),

    /// The worker understood and rejected the request. Not retried.
    #[error("Worker rejected request ({status}): {message}")]
    Permanent { status: u16, message: String },

    /// No admission slot freed up before the caller's deadline.
    #[error("No RPC slot available within {0:?}")]
    AdmissionTimeout(Duration),

    /// A single attempt exceeded its per-call timeout. Retried.
    #[error("Worker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Progress stream error: {0}")]
    Stream(String),

    #[error("Malformed worker response: {0}")]
    Decode(String),

    #[error("Worker client is shut down")]
    Shutdown,

    #[error("Invalid worker client configuration: {0}")]
    Config(String),
}

impl RpcError {
    /// Whether the retry policy may try the call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Transient(_) | RpcError::Timeout(_))
    }

    /// Whether the failure says something about the worker being unreachable.
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            RpcError::Transient(_) | RpcError::Timeout(_) | RpcError::Stream(_)
        )
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        if status == 429 || status >= 500 {
            RpcError::Transient(format!("HTTP {status}: {message}"))
        } else {
            RpcError::Permanent { status, message }
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            RpcError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            RpcError::from_status(status.as_u16(), e.to_string())
        } else {
            RpcError::Transient(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Decode(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_throttling_are_transient() {
        assert!(RpcError::from_status(503, "busy".into()).is_transient());
        assert!(RpcError::from_status(429, "slow down".into()).is_transient());
        assert!(!RpcError::from_status(404, "no such task".into()).is_transient());
        assert!(!RpcError::from_status(400, "bad params".into()).is_transient());
    }

    #[test]
    fn admission_timeout_is_not_retried() {
        assert!(!RpcError::AdmissionTimeout(Duration::from_secs(1)).is_transient());
        assert!(RpcError::Timeout(Duration::from_secs(1)).is_transient());
    }
}
