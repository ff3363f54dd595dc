use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use epdd_algo::RpcError;
use epdd_core::error::CoreError;
use epdd_db::store::StoreError;
use epdd_pipeline::PipelineError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`PipelineError`] and adds extractor
/// rejections. Implements [`IntoResponse`] to produce consistent JSON error
/// responses of the form `{ "error": message, "code": CODE }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `epdd_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A job operation failed in the orchestration layer.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A body or query string that could not be extracted.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut retry_after = None;

        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::RateLimited { retry_after_secs } => {
                    retry_after = Some(*retry_after_secs);
                    (
                        StatusCode::TOO_MANY_REQUESTS,
                        "RATE_LIMITED",
                        core.to_string(),
                    )
                }
            },

            // --- Job orchestration errors ---
            AppError::Pipeline(err) => classify_pipeline_error(err),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        let mut response = (status, axum::Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(secs));
        }
        response
    }
}

/// Classify a [`PipelineError`] into an HTTP status, error code, and message.
///
/// - Worker-side overload (no admission slot, client shut down) maps to 503.
/// - Any other worker failure maps to 502.
/// - Store failures other than a duplicate id map to 500 with a sanitized
///   message.
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    match err {
        PipelineError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job with id {id} not found"),
        ),
        PipelineError::Validation(msg) => {
            (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
        }
        PipelineError::NotCompleted { .. } => {
            (StatusCode::BAD_REQUEST, "NOT_COMPLETED", err.to_string())
        }
        PipelineError::NotCancellable { .. } => {
            (StatusCode::BAD_REQUEST, "NOT_CANCELLABLE", err.to_string())
        }
        PipelineError::Duplicate(_) => (
            StatusCode::CONFLICT,
            "DUPLICATE_REQUEST",
            err.to_string(),
        ),
        PipelineError::Store(StoreError::Duplicate(id)) => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job with id {id} already exists"),
        ),
        PipelineError::Store(store) => {
            tracing::error!(error = %store, "Job store error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
        PipelineError::Rpc(rpc @ (RpcError::AdmissionTimeout(_) | RpcError::Shutdown)) => {
            tracing::warn!(error = %rpc, "Worker unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                rpc.to_string(),
            )
        }
        PipelineError::Rpc(rpc) => {
            tracing::warn!(error = %rpc, "Worker call failed");
            (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", rpc.to_string())
        }
    }
}
