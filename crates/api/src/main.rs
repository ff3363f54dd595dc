use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use epdd_algo::AlgoClient;
use epdd_db::cache::MemoryCache;
use epdd_db::repositories::job_repo::PgJobStore;
use epdd_events::BroadcastHub;
use epdd_pipeline::{IdempotencyGuard, JobLifecycle, JobService, ReconcileScheduler};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use epdd_api::config::ServerConfig;
use epdd_api::router::build_app_router;
use epdd_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    init_tracing();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = epdd_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    epdd_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    epdd_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let store = Arc::new(PgJobStore::new(pool));
    let cache = Arc::new(MemoryCache::new());

    // --- Shutdown coordination ---
    let cancel = CancellationToken::new();

    // --- Worker client ---
    let client = Arc::new(
        AlgoClient::new(config.algo_client_config()).expect("Failed to build worker client"),
    );
    let probe_handle = client
        .start_health_observer(cancel.clone())
        .expect("Invalid ALGO_BASE_URL");
    tracing::info!("Worker client started");

    // --- Broadcast hub ---
    let (hub, hub_handle) = BroadcastHub::spawn(config.hub_config(), cancel.clone());
    tracing::info!("Broadcast hub started");

    // --- Job orchestration ---
    let lifecycle = Arc::new(JobLifecycle::new(
        store,
        cache.clone(),
        hub.clone(),
        config.lifecycle_config(),
    ));
    let service = Arc::new(JobService::new(
        lifecycle.clone(),
        client.clone(),
        IdempotencyGuard::new(cache.clone(), config.idempotency_ttl()),
        config.retry_policy(),
        cancel.child_token(),
    ));

    let scheduler = Arc::new(ReconcileScheduler::new(
        lifecycle.clone(),
        client.clone(),
        cache,
        config.reconcile_config(),
    ));
    let scheduler_handles = scheduler.start(cancel.clone());
    tracing::info!("Reconciliation scheduler started");

    // --- App state ---
    let config = Arc::new(config);
    let state = AppState::new(config.clone(), service.clone(), client.monitor().clone());

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let step_timeout = config.shutdown_timeout();

    lifecycle
        .announce(serde_json::json!({ "event": "shutdown", "message": "Server is shutting down" }))
        .await;

    // Stop relays first so no transition races the hub shutdown.
    service.shutdown().await;
    tracing::info!("Progress relays stopped");

    cancel.cancel();
    for handle in scheduler_handles {
        join_with_timeout("reconciliation task", handle, step_timeout).await;
    }
    tracing::info!("Reconciliation scheduler stopped");

    hub.shutdown().await;
    join_with_timeout("broadcast hub", hub_handle, step_timeout).await;
    tracing::info!("Broadcast hub shut down");

    client.shutdown();
    join_with_timeout("worker health probe", probe_handle, step_timeout).await;
    tracing::info!("Worker client shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Install the global subscriber. `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "epdd_api=debug,epdd_pipeline=debug,tower_http=debug".into());

    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn join_with_timeout(name: &'static str, handle: JoinHandle<()>, limit: Duration) {
    if tokio::time::timeout(limit, handle).await.is_err() {
        tracing::warn!(task = name, "Task did not stop in time");
    }
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl-C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
