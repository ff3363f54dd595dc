use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use epdd_algo::retry::RetryPolicy;
use epdd_algo::AlgoClientConfig;
use epdd_events::HubConfig;
use epdd_pipeline::{LifecycleConfig, ReconcileConfig};

/// Gateway configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development. The typed
/// per-component configs are derived from it with the `*_config` methods.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8080`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Bound on each post-shutdown cleanup step (default: `5`).
    pub shutdown_timeout_secs: u64,

    /// Worker HTTP base URL.
    pub algo_base_url: String,
    /// Worker WebSocket base URL for progress streams.
    pub algo_ws_url: String,
    pub algo_max_concurrent_calls: usize,
    pub algo_max_retries: u32,
    pub algo_initial_backoff_ms: u64,
    pub algo_max_backoff_ms: u64,
    pub algo_request_timeout_secs: u64,
    /// Longest wait for a worker call slot before failing with 503.
    pub algo_admission_timeout_ms: u64,

    pub hub_heartbeat_secs: u64,

    /// RUNNING jobs silent for this long are failed by the sweep.
    pub zombie_timeout_mins: u64,
    pub zombie_sweep_secs: u64,
    pub health_probe_secs: u64,
    pub scheme_refresh_secs: u64,

    /// Requests per identity per sliding minute.
    pub rate_limit_per_minute: u64,
    pub idempotency_ttl_secs: u64,

    pub scheme_cache_key: String,
    pub progress_key_ns: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                     | Default                  |
    /// |-----------------------------|--------------------------|
    /// | `HOST`                      | `0.0.0.0`                |
    /// | `PORT`                      | `8080`                   |
    /// | `CORS_ORIGINS`              | `http://localhost:5173`  |
    /// | `REQUEST_TIMEOUT_SECS`      | `30`                     |
    /// | `SHUTDOWN_TIMEOUT_SECS`     | `5`                      |
    /// | `ALGO_BASE_URL`             | `http://localhost:50051` |
    /// | `ALGO_WS_URL`               | `ws://localhost:50051`   |
    /// | `ALGO_MAX_CONCURRENT_CALLS` | `100`                    |
    /// | `ALGO_MAX_RETRIES`          | `3`                      |
    /// | `ALGO_INITIAL_BACKOFF_MS`   | `100`                    |
    /// | `ALGO_MAX_BACKOFF_MS`       | `5000`                   |
    /// | `ALGO_REQUEST_TIMEOUT_SECS` | `30`                     |
    /// | `ALGO_ADMISSION_TIMEOUT_MS` | `30000`                  |
    /// | `HUB_HEARTBEAT_SECS`        | `30`                     |
    /// | `ZOMBIE_TIMEOUT_MINS`       | `30`                     |
    /// | `ZOMBIE_SWEEP_SECS`         | `300`                    |
    /// | `HEALTH_PROBE_SECS`         | `30`                     |
    /// | `SCHEME_REFRESH_SECS`       | `60`                     |
    /// | `RATE_LIMIT_PER_MINUTE`     | `100`                    |
    /// | `IDEMPOTENCY_TTL_SECS`      | `600`                    |
    /// | `SCHEME_CACHE_KEY`          | `sys:algo:schemes`       |
    /// | `PROGRESS_KEY_NS`           | `job:progress:`          |
    ///
    /// `DATABASE_URL` is read separately by the binary.
    ///
    /// Panics on values that do not parse, so misconfiguration fails at
    /// startup.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let cors_origins: Vec<String> = text("CORS_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            host: text("HOST", "0.0.0.0"),
            port: parsed(&lookup, "PORT", 8080),
            cors_origins,
            request_timeout_secs: parsed(&lookup, "REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: parsed(&lookup, "SHUTDOWN_TIMEOUT_SECS", 5),
            algo_base_url: text("ALGO_BASE_URL", "http://localhost:50051"),
            algo_ws_url: text("ALGO_WS_URL", "ws://localhost:50051"),
            algo_max_concurrent_calls: parsed(&lookup, "ALGO_MAX_CONCURRENT_CALLS", 100),
            algo_max_retries: parsed(&lookup, "ALGO_MAX_RETRIES", 3),
            algo_initial_backoff_ms: parsed(&lookup, "ALGO_INITIAL_BACKOFF_MS", 100),
            algo_max_backoff_ms: parsed(&lookup, "ALGO_MAX_BACKOFF_MS", 5000),
            algo_request_timeout_secs: parsed(&lookup, "ALGO_REQUEST_TIMEOUT_SECS", 30),
            algo_admission_timeout_ms: parsed(&lookup, "ALGO_ADMISSION_TIMEOUT_MS", 30_000),
            hub_heartbeat_secs: parsed(&lookup, "HUB_HEARTBEAT_SECS", 30),
            zombie_timeout_mins: parsed(&lookup, "ZOMBIE_TIMEOUT_MINS", 30),
            zombie_sweep_secs: parsed(&lookup, "ZOMBIE_SWEEP_SECS", 300),
            health_probe_secs: parsed(&lookup, "HEALTH_PROBE_SECS", 30),
            scheme_refresh_secs: parsed(&lookup, "SCHEME_REFRESH_SECS", 60),
            rate_limit_per_minute: parsed(&lookup, "RATE_LIMIT_PER_MINUTE", 100),
            idempotency_ttl_secs: parsed(&lookup, "IDEMPOTENCY_TTL_SECS", 600),
            scheme_cache_key: text("SCHEME_CACHE_KEY", "sys:algo:schemes"),
            progress_key_ns: text("PROGRESS_KEY_NS", "job:progress:"),
        }
    }

    /// Backoff shared by unary worker calls and progress-stream reconnects.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.algo_max_retries,
            initial_backoff: Duration::from_millis(self.algo_initial_backoff_ms),
            max_backoff: Duration::from_millis(self.algo_max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    pub fn algo_client_config(&self) -> AlgoClientConfig {
        AlgoClientConfig {
            max_concurrent_calls: self.algo_max_concurrent_calls,
            request_timeout: Duration::from_secs(self.algo_request_timeout_secs),
            admission_timeout: Duration::from_millis(self.algo_admission_timeout_ms),
            retry: self.retry_policy(),
            ..AlgoClientConfig::new(&self.algo_base_url, &self.algo_ws_url)
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            heartbeat_period: Duration::from_secs(self.hub_heartbeat_secs),
            ..HubConfig::default()
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            scheme_cache_key: self.scheme_cache_key.clone(),
            progress_key_ns: self.progress_key_ns.clone(),
            ..LifecycleConfig::default()
        }
    }

    pub fn reconcile_config(&self) -> ReconcileConfig {
        ReconcileConfig {
            zombie_sweep_interval: Duration::from_secs(self.zombie_sweep_secs),
            zombie_timeout: Duration::from_secs(self.zombie_timeout_mins * 60),
            health_interval: Duration::from_secs(self.health_probe_secs),
            scheme_refresh_interval: Duration::from_secs(self.scheme_refresh_secs),
            ..ReconcileConfig::default()
        }
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

fn parsed<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid number: {e}")),
        None => default,
    }
}
