//! Admission gate bounding concurrent in-flight worker calls.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::RpcError;

/// Default ceiling on concurrent in-flight calls.
pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 100;

/// Counting semaphore with a deadline on acquisition.
///
/// A permit is released when it is dropped.
#[derive(Clone)]
pub struct AdmissionGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionGate {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a permit for at most `deadline`.
    pub async fn acquire(&self, deadline: Duration) -> Result<OwnedSemaphorePermit, RpcError> {
        match tokio::time::timeout(deadline, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_closed)) => Err(RpcError::Shutdown),
            Err(_elapsed) => {
                tracing::warn!(
                    capacity = self.capacity,
                    deadline_ms = deadline.as_millis() as u64,
                    "Admission gate saturated"
                );
                Err(RpcError::AdmissionTimeout(deadline))
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Reject all current and future waiters with [`RpcError::Shutdown`].
    pub fn close(&self) {
        self.semaphore.close();
    }
}

impl Default for AdmissionGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT_CALLS)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn call_beyond_ceiling_times_out() {
        let gate = AdmissionGate::new(2);
        let _a = gate.acquire(Duration::from_secs(1)).await.unwrap();
        let _b = gate.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        let third = gate.acquire(Duration::from_millis(500)).await;
        assert_matches!(third, Err(RpcError::AdmissionTimeout(d)) if d == Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_proceeds_once_a_permit_frees() {
        let gate = AdmissionGate::new(1);
        let held = gate.acquire(Duration::from_secs(1)).await.unwrap();

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Duration::from_secs(5)).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        drop(held);

        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(gate.in_flight(), 0);
    }

    #[tokio::test]
    async fn closed_gate_rejects_callers() {
        let gate = AdmissionGate::new(1);
        gate.close();
        assert_matches!(gate.acquire(Duration::from_secs(1)).await, Err(RpcError::Shutdown));
    }
}
