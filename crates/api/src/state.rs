use std::sync::Arc;

use epdd_algo::health::ConnectionMonitor;
use epdd_events::BroadcastHub;
use epdd_pipeline::{JobLifecycle, JobService, RateLimiter};

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: every field is an `Arc` or a cloneable handle.
#[derive(Clone)]
pub struct AppState {
    /// Gateway configuration.
    pub config: Arc<ServerConfig>,
    /// Job operations (submit, cancel, queries, worker callback).
    pub service: Arc<JobService>,
    /// Progress fan-out to WebSocket observers.
    pub hub: BroadcastHub,
    /// Advisory connection state of the worker channel.
    pub worker_monitor: ConnectionMonitor,
    /// Per-identity request limiter for `/api/v1`.
    pub rate_limiter: Arc<RateLimiter>,
}

impl AppState {
    /// Assemble the state around a job service. The hub and the rate
    /// limiter's cache are taken from the service's lifecycle manager.
    pub fn new(
        config: Arc<ServerConfig>,
        service: Arc<JobService>,
        worker_monitor: ConnectionMonitor,
    ) -> Self {
        let lifecycle = service.lifecycle();
        let rate_limiter = Arc::new(RateLimiter::new(
            lifecycle.cache().clone(),
            config.rate_limit_per_minute,
            RateLimiter::DEFAULT_WINDOW,
        ));
        Self {
            hub: lifecycle.hub().clone(),
            config,
            service,
            worker_monitor,
            rate_limiter,
        }
    }

    pub fn lifecycle(&self) -> &Arc<JobLifecycle> {
        self.service.lifecycle()
    }
}
