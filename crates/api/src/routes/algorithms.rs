use axum::routing::get;
use axum::Router;

use crate::handlers::algorithms;
use crate::state::AppState;

/// Routes mounted at `/algorithms`.
pub fn router() -> Router<AppState> {
    Router::new().route("/schemes", get(algorithms::list_schemes))
}
