#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use epdd_algo::health::ConnectionMonitor;
use epdd_algo::retry::RetryPolicy;
use epdd_algo::{Ack, CancelResponse, HealthStatus, ProgressFrames, RpcError, SubmitTask, WorkerRpc};
use epdd_core::scheme::Scheme;
use epdd_db::cache::MemoryCache;
use epdd_db::memory::MemoryJobStore;
use epdd_events::{BroadcastHub, HubConfig};
use epdd_pipeline::{IdempotencyGuard, JobLifecycle, JobService, LifecycleConfig};
use futures::StreamExt;
use http_body_util::BodyExt;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use epdd_api::config::ServerConfig;
use epdd_api::router::build_app_router;
use epdd_api::state::AppState;

// ---------------------------------------------------------------------------
// Fake worker
// ---------------------------------------------------------------------------

/// In-process [`WorkerRpc`]. Progress streams never yield, so relays
/// stay idle and tests drive transitions through the lifecycle manager or
/// the callback endpoint.
pub struct FakeWorker {
    pub submit_error: Mutex<Option<RpcError>>,
    pub submit_calls: AtomicUsize,
    pub cancel_calls: AtomicUsize,
}

impl FakeWorker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            submit_error: Mutex::new(None),
            submit_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl WorkerRpc for FakeWorker {
    async fn list_schemes(&self) -> Result<Vec<Scheme>, RpcError> {
        Ok(vec![Scheme {
            model: "KBM".to_string(),
            code: "KBM-WF01".to_string(),
            name: "Waveform fit".to_string(),
            class_name: "KbmWf01".to_string(),
            resource_type: "cpu".to_string(),
            description: String::new(),
            required_params: vec!["window".to_string()],
        }])
    }

    async fn submit(&self, task: &SubmitTask) -> Result<Ack, RpcError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.submit_error.lock().unwrap().clone() {
            return Err(e);
        }
        Ok(Ack {
            success: true,
            message: task.task_id.clone(),
        })
    }

    async fn watch_progress(&self, _job_id: &str) -> Result<ProgressFrames, RpcError> {
        Ok(futures::stream::pending().boxed())
    }

    async fn cancel(&self, job_id: &str, _force: bool) -> Result<CancelResponse, RpcError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        Ok(CancelResponse {
            accepted: true,
            message: format!("cancel requested for {job_id}"),
            status: "CANCELLED".to_string(),
        })
    }

    async fn health(&self) -> Result<HealthStatus, RpcError> {
        Ok(HealthStatus {
            status: "SERVING".to_string(),
            metrics: Default::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        ..ServerConfig::default()
    }
}

/// Everything a test may want to poke behind the router.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryJobStore>,
    pub cache: Arc<MemoryCache>,
    pub worker: Arc<FakeWorker>,
    pub lifecycle: Arc<JobLifecycle>,
    pub monitor: ConnectionMonitor,
    pub cancel: CancellationToken,
}

impl TestApp {
    /// A fresh clone of the router for one `oneshot` request.
    pub fn app(&self) -> Router {
        self.router.clone()
    }
}

/// Build the full application router with all middleware layers over
/// in-process collaborators.
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config())
}

pub fn build_test_app_with(config: ServerConfig) -> TestApp {
    let store = Arc::new(MemoryJobStore::new());
    let cache = Arc::new(MemoryCache::new());
    let cancel = CancellationToken::new();
    let (hub, _hub_task) = BroadcastHub::spawn(HubConfig::default(), cancel.clone());
    let lifecycle = Arc::new(JobLifecycle::new(
        store.clone(),
        cache.clone(),
        hub,
        LifecycleConfig::default(),
    ));
    let worker = FakeWorker::new();
    let service = Arc::new(JobService::new(
        lifecycle.clone(),
        worker.clone(),
        IdempotencyGuard::new(cache.clone(), config.idempotency_ttl()),
        RetryPolicy::default(),
        cancel.child_token(),
    ));
    let monitor = ConnectionMonitor::new();

    let config = Arc::new(config);
    let state = AppState::new(config.clone(), service, monitor.clone());
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        store,
        cache,
        worker,
        lifecycle,
        monitor,
        cancel,
    }
}

/// A valid submission body.
pub fn submit_body() -> serde_json::Value {
    serde_json::json!({
        "scheme": "KBM-WF01",
        "data_id": "sample_001",
        "params": {"window": 5},
        "user_id": "u1",
    })
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    post_json_with(app, uri, body, &[]).await
}

pub async fn post_json_with(
    app: Router,
    uri: &str,
    body: serde_json::Value,
    headers: &[(&str, &str)],
) -> Response<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    send(app, request).await
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Submit a valid job and return its id.
pub async fn submit_job(test: &TestApp) -> String {
    let response = post_json(test.app(), "/api/v1/jobs", submit_body()).await;
    assert_eq!(response.status(), 201);
    let json = body_json(response).await;
    json["data"]["job_id"].as_str().unwrap().to_string()
}

/// Poll until the hub reports `count` subscribers for `job_id`.
pub async fn wait_for_subscribers(test: &TestApp, job_id: &str, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while test.state.hub.subscriber_count(job_id).await.unwrap() != count {
        assert!(
            tokio::time::Instant::now() < deadline,
            "subscriber count for {job_id} never reached {count}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
