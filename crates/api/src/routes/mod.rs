pub mod algorithms;
pub mod health;
pub mod internal;
pub mod jobs;

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::middleware::rate_limit;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /algorithms/schemes                  list schemes (GET)
///
/// /jobs                                list, submit
/// /jobs/{id}                           get
/// /jobs/{id}/result                    result of a successful job (GET)
/// /jobs/{id}/cancel                    cancel, ?force= (POST)
/// /jobs/{id}/ws                        WebSocket progress, ?observer=
///
/// /stats                               aggregate job statistics (GET)
///
/// /internal/tasks/{id}/result          worker result callback (POST)
/// ```
///
/// Every route except the worker callback is rate limited per identity.
pub fn api_routes(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .nest("/algorithms", algorithms::router())
        .nest("/jobs", jobs::router())
        .route("/stats", get(handlers::stats::get_stats))
        .route_layer(from_fn_with_state(state, rate_limit));

    public.nest("/internal", internal::router())
}
