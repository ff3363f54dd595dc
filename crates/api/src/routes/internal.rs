use axum::routing::post;
use axum::Router;

use crate::handlers::internal;
use crate::state::AppState;

/// Worker-facing routes mounted at `/internal`.
pub fn router() -> Router<AppState> {
    Router::new().route("/tasks/{id}/result", post(internal::report_result))
}
