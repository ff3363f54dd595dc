use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET  /                -> list_jobs
/// POST /                -> submit_job
/// GET  /{id}            -> get_job
/// GET  /{id}/result     -> get_job_result
/// POST /{id}/cancel     -> cancel_job
/// GET  /{id}/ws         -> progress WebSocket
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(jobs::list_jobs).post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job))
        .route("/{id}/result", get(jobs::get_job_result))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/ws", get(ws::progress_ws))
}
