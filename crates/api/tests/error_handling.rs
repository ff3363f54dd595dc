//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no router is
//! involved.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use epdd_algo::RpcError;
use epdd_api::error::AppError;
use epdd_core::error::CoreError;
use epdd_db::models::status::JobStatus;
use epdd_db::store::StoreError;
use epdd_pipeline::PipelineError;
use http_body_util::BodyExt;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: job lookups and state checks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_job_returns_404() {
    let err = AppError::Pipeline(PipelineError::NotFound("job-7".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id job-7 not found");
}

#[tokio::test]
async fn unfinished_and_finished_jobs_return_400() {
    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::NotCompleted {
        job_id: "job-7".into(),
        status: JobStatus::Running,
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "NOT_COMPLETED");
    assert!(json["error"].as_str().unwrap().contains("RUNNING"));

    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::NotCancellable {
        job_id: "job-7".into(),
        status: JobStatus::Success,
    }))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "NOT_CANCELLABLE");
}

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Pipeline(PipelineError::Validation("unknown scheme: X".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "unknown scheme: X");
}

// ---------------------------------------------------------------------------
// Test: conflicts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn duplicate_request_returns_409() {
    let (status, json) =
        error_to_response(AppError::Pipeline(PipelineError::Duplicate("k1".into()))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "DUPLICATE_REQUEST");

    let (status, json) = error_to_response(AppError::Pipeline(PipelineError::Store(
        StoreError::Duplicate("job-7".into()),
    )))
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONFLICT");
}

// ---------------------------------------------------------------------------
// Test: infrastructure failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn store_failure_returns_sanitized_500() {
    let err = AppError::Pipeline(PipelineError::Store(StoreError::Timeout(
        Duration::from_secs(10),
    )));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn worker_overload_returns_503() {
    let err = AppError::Pipeline(PipelineError::Rpc(RpcError::AdmissionTimeout(
        Duration::from_secs(30),
    )));
    let (status, json) = error_to_response(err).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");

    let (status, _) = error_to_response(AppError::Pipeline(PipelineError::Rpc(RpcError::Shutdown))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn other_worker_errors_return_502() {
    let err = AppError::Pipeline(PipelineError::Rpc(RpcError::Permanent {
        status: 400,
        message: "bad params".into(),
    }));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "UPSTREAM_ERROR");
    assert!(json["error"].as_str().unwrap().contains("bad params"));
}

// ---------------------------------------------------------------------------
// Test: rate limiting carries Retry-After
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limited_sets_retry_after() {
    let response = AppError::Core(CoreError::RateLimited {
        retry_after_secs: 17,
    })
    .into_response();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()["retry-after"], "17");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("invalid field value".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "invalid field value");
}
