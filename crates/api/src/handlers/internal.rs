//! Callback endpoint used by the remote worker.

use axum::extract::{Path, State};
use axum::Json;
use epdd_core::report::WorkerReport;
use epdd_pipeline::ReportAck;
use serde::Serialize;

use crate::error::AppResult;
use crate::extract::AppJson;
use crate::state::AppState;

/// Acknowledgement returned to the worker.
#[derive(Debug, Serialize)]
pub struct CallbackAck {
    pub success: bool,
    pub message: &'static str,
}

/// POST /api/v1/internal/tasks/{id}/result
///
/// A report for a job that already finished is acknowledged without being
/// applied again, so worker retries are harmless.
pub async fn report_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    AppJson(report): AppJson<WorkerReport>,
) -> AppResult<Json<CallbackAck>> {
    let ack = state.service.report_result(&job_id, &report).await?;

    let message = match ack {
        ReportAck::Accepted => {
            tracing::info!(job_id = %job_id, "Worker result recorded");
            "Result recorded"
        }
        ReportAck::AlreadyFinished => "Job already finished",
    };

    Ok(Json(CallbackAck {
        success: true,
        message,
    }))
}
