//! Handlers for job submission, queries and cancellation.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use epdd_core::submission::SubmitJob;
use epdd_core::types::JobId;
use epdd_db::models::job::JobFilter;
use epdd_db::models::status::JobStatus;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::extract::{AppJson, AppQuery};
use crate::middleware::IDEMPOTENCY_KEY_HEADER;
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for `POST /jobs/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelParams {
    /// `true` or `1` requests a forced stop.
    pub force: Option<String>,
}

impl CancelParams {
    pub fn is_forced(&self) -> bool {
        matches!(self.force.as_deref(), Some("true") | Some("1"))
    }
}

/// Body of `GET /jobs/{id}/result`.
#[derive(Debug, Serialize)]
pub struct JobResult {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Validates the request, records a PENDING job and dispatches it to the
/// worker. A repeated `Idempotency-Key` within its TTL is rejected with 409.
pub async fn submit_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    AppJson(input): AppJson<SubmitJob>,
) -> AppResult<impl IntoResponse> {
    let idempotency_key = headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let scheme = input.scheme.clone();
    let receipt = state.service.submit(input, idempotency_key).await?;

    tracing::info!(
        job_id = %receipt.job_id,
        scheme = %scheme,
        "Job submitted",
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: receipt })))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/jobs
///
/// Paginated listing filtered by `user_id` and `status`.
pub async fn list_jobs(
    State(state): State<AppState>,
    AppQuery(filter): AppQuery<JobFilter>,
) -> AppResult<impl IntoResponse> {
    let page = state.service.list_jobs(&filter).await?;
    Ok(Json(DataResponse { data: page }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job = state.service.get_job(&job_id).await?;
    Ok(Json(DataResponse { data: job }))
}

/// GET /api/v1/jobs/{id}/result
///
/// Only available once the job has succeeded.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let result = state.service.result(&job_id).await?;
    Ok(Json(DataResponse {
        data: JobResult {
            job_id,
            status: JobStatus::Success,
            result,
        },
    }))
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs/{id}/cancel?force=
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    AppQuery(params): AppQuery<CancelParams>,
) -> AppResult<impl IntoResponse> {
    let force = params.is_forced();
    let outcome = state.service.cancel(&job_id, force).await?;

    tracing::info!(
        job_id = %job_id,
        force,
        accepted = outcome.success,
        status = %outcome.status,
        "Job cancel requested",
    );

    Ok(Json(DataResponse { data: outcome }))
}
