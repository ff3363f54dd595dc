//! Connection-health tracking for the worker channel.
//!
//! [`ConnectionMonitor`] publishes a [`ConnectionState`] through a
//! `tokio::sync::watch` channel. The state is fed by a periodic TCP probe
//! ([`spawn_probe`]) and by the outcome of every call made through the
//! client. It is advisory: callers are never blocked on it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RpcError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No traffic observed yet.
    Idle,
    Connecting,
    Ready,
    TransientFailure,
    Shutdown,
}

impl ConnectionState {
    pub fn is_healthy(self) -> bool {
        matches!(self, ConnectionState::Ready | ConnectionState::Idle)
    }
}

#[derive(Clone)]
pub struct ConnectionMonitor {
    tx: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// Move to `next`, logging real transitions. `Shutdown` is final.
    pub fn set(&self, next: ConnectionState) {
        self.tx.send_if_modified(|state| {
            if *state == next || *state == ConnectionState::Shutdown {
                return false;
            }
            let from = *state;
            tracing::info!(from = ?from, to = ?next, "Worker connection state changed");
            *state = next;
            true
        });
    }

    /// Fold a call outcome into the state.
    ///
    /// Any response from the worker, including a rejection, proves the
    /// channel works; connectivity failures mark it as failing.
    pub fn observe<T>(&self, result: &Result<T, RpcError>) {
        match result {
            Ok(_) | Err(RpcError::Permanent { .. }) | Err(RpcError::Decode(_)) => {
                self.set(ConnectionState::Ready)
            }
            Err(e) if e.is_connectivity() => self.set(ConnectionState::TransientFailure),
            Err(_) => {}
        }
    }
}

impl Default for ConnectionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a task that probes TCP reachability of `addr` every `interval`.
///
/// Each probe is bounded by `timeout`. The task sets the state to
/// `Shutdown` and exits when `cancel` fires.
pub fn spawn_probe(
    monitor: ConnectionMonitor,
    addr: String,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    monitor.set(ConnectionState::Shutdown);
                    tracing::info!(addr = %addr, "Worker connection probe stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }

            if monitor.state() != ConnectionState::Ready {
                monitor.set(ConnectionState::Connecting);
            }
            match tokio::time::timeout(timeout, tokio::net::TcpStream::connect(&addr)).await {
                Ok(Ok(_stream)) => monitor.set(ConnectionState::Ready),
                Ok(Err(e)) => {
                    tracing::debug!(addr = %addr, error = %e, "Worker probe failed");
                    monitor.set(ConnectionState::TransientFailure);
                }
                Err(_) => {
                    tracing::debug!(addr = %addr, "Worker probe timed out");
                    monitor.set(ConnectionState::TransientFailure);
                }
            }
        }
    })
}
