use axum::extract::State;
use axum::{routing::get, Json, Router};
use epdd_algo::ConnectionState;
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` when every dependency is healthy, otherwise `degraded`.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    pub checks: HealthChecks,
    /// Connected WebSocket observers across all jobs.
    pub subscribers: usize,
}

#[derive(Serialize)]
pub struct HealthChecks {
    pub store: DependencyHealth,
    pub cache: DependencyHealth,
    pub worker: WorkerHealth,
}

#[derive(Serialize)]
pub struct DependencyHealth {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyHealth {
    fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                healthy: true,
                error: None,
            },
            Err(e) => Self {
                healthy: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Serialize)]
pub struct WorkerHealth {
    pub healthy: bool,
    pub state: ConnectionState,
}

/// GET /health -- returns gateway and dependency health.
///
/// Always 200; a failing dependency only degrades the status.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let lifecycle = state.lifecycle();
    let store = DependencyHealth::from_result(lifecycle.store().ping().await);
    let cache = DependencyHealth::from_result(lifecycle.cache().ping().await);
    let worker_state = state.worker_monitor.state();
    let worker = WorkerHealth {
        healthy: worker_state.is_healthy(),
        state: worker_state,
    };
    let subscribers = state.hub.total_subscribers().await.unwrap_or(0);

    let status = if store.healthy && cache.healthy && worker.healthy {
        "ok"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        checks: HealthChecks {
            store,
            cache,
            worker,
        },
        subscribers,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
