//! Periodic reconciliation tasks.
//!
//! Three independent loops, each on its own interval and bounded by its
//! own per-cycle timeout:
//!
//! - **zombie sweep**: fail RUNNING jobs that stopped reporting progress;
//! - **health probe**: cache a snapshot of the worker's health;
//! - **scheme refresh**: keep the cached scheme list warm.
//!
//! Cycle failures are logged and never stop a loop.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use epdd_algo::WorkerRpc;
use epdd_db::cache::{set_json, SharedCache};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::lifecycle::JobLifecycle;

#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    pub zombie_sweep_interval: Duration,
    /// RUNNING jobs untouched for longer than this are failed.
    pub zombie_timeout: Duration,
    pub zombie_cycle_timeout: Duration,
    pub health_interval: Duration,
    pub health_cycle_timeout: Duration,
    pub health_ttl: Duration,
    pub health_key: String,
    pub scheme_refresh_interval: Duration,
    pub scheme_cycle_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            zombie_sweep_interval: Duration::from_secs(5 * 60),
            zombie_timeout: Duration::from_secs(30 * 60),
            zombie_cycle_timeout: Duration::from_secs(30),
            health_interval: Duration::from_secs(30),
            health_cycle_timeout: Duration::from_secs(5),
            health_ttl: Duration::from_secs(60),
            health_key: "sys:algo:health".to_string(),
            scheme_refresh_interval: Duration::from_secs(60),
            scheme_cycle_timeout: Duration::from_secs(10),
        }
    }
}

pub struct ReconcileScheduler {
    lifecycle: Arc<JobLifecycle>,
    rpc: Arc<dyn WorkerRpc>,
    cache: Arc<dyn SharedCache>,
    config: ReconcileConfig,
}

impl ReconcileScheduler {
    pub fn new(
        lifecycle: Arc<JobLifecycle>,
        rpc: Arc<dyn WorkerRpc>,
        cache: Arc<dyn SharedCache>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            lifecycle,
            rpc,
            cache,
            config,
        }
    }

    /// Spawn the three loops. They stop when `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let zombie = {
            let this = self.clone();
            spawn_periodic(
                "zombie_sweep",
                self.config.zombie_sweep_interval,
                self.config.zombie_cycle_timeout,
                cancel.clone(),
                move || {
                    let this = this.clone();
                    async move {
                        this.sweep_zombies().await;
                    }
                },
            )
        };
        let health = {
            let this = self.clone();
            spawn_periodic(
                "health_probe",
                self.config.health_interval,
                self.config.health_cycle_timeout,
                cancel.clone(),
                move || {
                    let this = this.clone();
                    async move {
                        this.probe_health().await;
                    }
                },
            )
        };
        let schemes = {
            let this = self.clone();
            spawn_periodic(
                "scheme_refresh",
                self.config.scheme_refresh_interval,
                self.config.scheme_cycle_timeout,
                cancel,
                move || {
                    let this = this.clone();
                    async move {
                        this.refresh_schemes().await;
                    }
                },
            )
        };
        vec![zombie, health, schemes]
    }

    /// One zombie sweep. Returns how many jobs were failed.
    pub async fn sweep_zombies(&self) -> usize {
        match self.lifecycle.sweep_zombies(self.config.zombie_timeout).await {
            Ok(failed) if failed.is_empty() => {
                tracing::debug!("Zombie sweep: nothing to clean");
                0
            }
            Ok(failed) => {
                tracing::info!(count = failed.len(), "Zombie sweep failed stale jobs");
                failed.len()
            }
            Err(e) => {
                tracing::error!(error = %e, "Zombie sweep failed");
                0
            }
        }
    }

    /// One health probe; the snapshot is cached and returned.
    pub async fn probe_health(&self) -> serde_json::Value {
        let checked = chrono::Utc::now().timestamp();
        let snapshot = match self.rpc.health().await {
            Ok(health) => json!({
                "status": health.status,
                "checked": checked,
                "metrics": health.metrics,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "Worker health check failed");
                json!({
                    "status": "DOWN",
                    "checked": checked,
                    "error": e.to_string(),
                })
            }
        };

        if let Err(e) = set_json(
            &*self.cache,
            &self.config.health_key,
            &snapshot,
            self.config.health_ttl,
        )
        .await
        {
            tracing::warn!(error = %e, "Failed to cache worker health");
        }
        snapshot
    }

    /// One scheme refresh. A failed fetch leaves the cached list alone.
    pub async fn refresh_schemes(&self) -> Option<usize> {
        match self.rpc.list_schemes().await {
            Ok(schemes) => {
                self.lifecycle.cache_schemes(&schemes).await;
                tracing::debug!(count = schemes.len(), "Scheme cache refreshed");
                Some(schemes.len())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Scheme refresh failed, keeping cached list");
                None
            }
        }
    }
}

/// Run `cycle` every `every`, each run bounded by `cycle_timeout`.
fn spawn_periodic<F, Fut>(
    name: &'static str,
    every: Duration,
    cycle_timeout: Duration,
    cancel: CancellationToken,
    cycle: F,
) -> JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tracing::info!(
            task = name,
            interval_secs = every.as_secs(),
            "Reconciliation task started",
        );

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(task = name, "Reconciliation task stopping");
                    break;
                }
                _ = interval.tick() => {
                    if tokio::time::timeout(cycle_timeout, cycle()).await.is_err() {
                        tracing::warn!(
                            task = name,
                            timeout_secs = cycle_timeout.as_secs(),
                            "Reconciliation cycle timed out",
                        );
                    }
                }
            }
        }
    })
}
