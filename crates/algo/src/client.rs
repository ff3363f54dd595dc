//! [`AlgoClient`]: the resilient [`WorkerRpc`] implementation.
//!
//! Every unary call takes a permit from the admission gate, waiting at most
//! the admission timeout, holds it for all of its retries, bounds each
//! attempt with the request timeout and reports its outcome to the
//! connection monitor.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use epdd_core::scheme::Scheme;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::AlgoApi;
use crate::error::RpcError;
use crate::gate::{AdmissionGate, DEFAULT_MAX_CONCURRENT_CALLS};
use crate::health::{spawn_probe, ConnectionMonitor, ConnectionState};
use crate::messages::{Ack, CancelResponse, HealthStatus, SubmitTask};
use crate::retry::{retry, RetryPolicy};
use crate::rpc::{ProgressFrames, WorkerRpc};
use crate::stream::{self, DEFAULT_MAX_MESSAGE_BYTES};

#[derive(Debug, Clone)]
pub struct AlgoClientConfig {
    /// Base HTTP URL, e.g. `http://localhost:50051`.
    pub api_url: String,
    /// Base WebSocket URL, e.g. `ws://localhost:50051`.
    pub ws_url: String,
    pub max_concurrent_calls: usize,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// How long a call may wait for an admission permit.
    pub admission_timeout: Duration,
    pub health_timeout: Duration,
    /// Interval of the TCP reachability probe and TCP keep-alive.
    pub keep_alive_interval: Duration,
    /// Bound on a single reachability probe.
    pub keep_alive_timeout: Duration,
    pub max_message_bytes: usize,
    pub retry: RetryPolicy,
}

impl AlgoClientConfig {
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            max_concurrent_calls: DEFAULT_MAX_CONCURRENT_CALLS,
            request_timeout: Duration::from_secs(30),
            admission_timeout: Duration::from_secs(30),
            health_timeout: Duration::from_secs(3),
            keep_alive_interval: Duration::from_secs(10),
            keep_alive_timeout: Duration::from_secs(3),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            retry: RetryPolicy::default(),
        }
    }
}

impl Default for AlgoClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:50051", "ws://localhost:50051")
    }
}

pub struct AlgoClient {
    api: AlgoApi,
    gate: AdmissionGate,
    monitor: ConnectionMonitor,
    config: AlgoClientConfig,
}

/// Bound one attempt with `limit`.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RpcError>>,
) -> Result<T, RpcError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| RpcError::Timeout(limit))?
}

impl AlgoClient {
    pub fn new(config: AlgoClientConfig) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .tcp_keepalive(config.keep_alive_interval)
            .pool_max_idle_per_host(config.max_concurrent_calls)
            .build()
            .map_err(|e| RpcError::Config(format!("Failed to build HTTP client: {e}")))?;

        tracing::info!(
            api_url = %config.api_url,
            ws_url = %config.ws_url,
            max_concurrent_calls = config.max_concurrent_calls,
            "Worker client configured"
        );

        Ok(Self {
            api: AlgoApi::with_client(http, config.api_url.clone()),
            gate: AdmissionGate::new(config.max_concurrent_calls),
            monitor: ConnectionMonitor::new(),
            config,
        })
    }

    pub fn config(&self) -> &AlgoClientConfig {
        &self.config
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn is_healthy(&self) -> bool {
        self.monitor.is_healthy()
    }

    /// Number of calls currently holding an admission permit.
    pub fn in_flight(&self) -> usize {
        self.gate.in_flight()
    }

    /// Spawn the TCP reachability probe against the worker's HTTP address.
    pub fn start_health_observer(
        &self,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, RpcError> {
        let addr = probe_addr(&self.config.api_url)?;
        Ok(spawn_probe(
            self.monitor.clone(),
            addr,
            self.config.keep_alive_interval,
            self.config.keep_alive_timeout,
            cancel,
        ))
    }

    /// Reject new calls and mark the connection as shut down.
    pub fn shutdown(&self) {
        self.gate.close();
        self.monitor.set(ConnectionState::Shutdown);
    }

    async fn unary<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let limit = self.config.request_timeout;
        let _permit = self.gate.acquire(self.config.admission_timeout).await?;
        let result = retry(&self.config.retry, operation, || bounded(limit, call())).await;
        self.monitor.observe(&result);
        result
    }
}

/// `host:port` of an HTTP base URL, for the TCP probe.
fn probe_addr(api_url: &str) -> Result<String, RpcError> {
    let url = reqwest::Url::parse(api_url)
        .map_err(|e| RpcError::Config(format!("Invalid worker URL {api_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| RpcError::Config(format!("Worker URL has no host: {api_url}")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| RpcError::Config(format!("Worker URL has no port: {api_url}")))?;
    Ok(format!("{host}:{port}"))
}

#[async_trait]
impl WorkerRpc for AlgoClient {
    async fn list_schemes(&self) -> Result<Vec<Scheme>, RpcError> {
        self.unary("list_schemes", || self.api.list_schemes()).await
    }

    async fn submit(&self, task: &SubmitTask) -> Result<Ack, RpcError> {
        self.unary("submit", || self.api.submit_task(task)).await
    }

    async fn watch_progress(&self, job_id: &str) -> Result<ProgressFrames, RpcError> {
        let url = stream::progress_url(&self.config.ws_url, job_id);
        let limit = self.config.request_timeout;
        // The permit covers the handshake only, not the stream's lifetime.
        let opened = {
            let _permit = self.gate.acquire(self.config.admission_timeout).await?;
            bounded(limit, stream::open(&url, self.config.max_message_bytes)).await
        };
        self.monitor.observe(&opened);
        opened
    }

    async fn cancel(&self, job_id: &str, force: bool) -> Result<CancelResponse, RpcError> {
        self.unary("cancel", || self.api.cancel_task(job_id, force)).await
    }

    async fn health(&self) -> Result<HealthStatus, RpcError> {
        let result = bounded(self.config.health_timeout, self.api.check_health()).await;
        self.monitor.observe(&result);
        result
    }

    fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }
}
