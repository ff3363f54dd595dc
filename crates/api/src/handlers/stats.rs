use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/stats
pub async fn get_stats(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let stats = state.service.stats().await?;
    Ok(Json(DataResponse { data: stats }))
}
