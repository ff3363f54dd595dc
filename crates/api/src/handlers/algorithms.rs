use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/algorithms/schemes
///
/// Served from the scheme cache; a cold cache falls through to the worker.
pub async fn list_schemes(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let schemes = state.service.schemes().await?;
    Ok(Json(DataResponse { data: schemes }))
}
