//! Per-job publish/subscribe hub with heartbeat and slow-consumer eviction.
//!
//! A single coordination task owns the membership table. Every other
//! party talks to it through a bounded command queue, so there is no lock
//! around subscriber sets. Delivery to a subscriber uses `try_send` only:
//! a peer that stops draining its queue is evicted rather than allowed to
//! stall the loop.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use epdd_core::types::JobId;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Default capacity of the hub's command queue.
pub const DEFAULT_COMMAND_CAPACITY: usize = 1024;

/// Default capacity of each subscriber's outbound queue.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Default interval between heartbeat pings.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub command_capacity: usize,
    pub subscriber_buffer: usize,
    /// Subscribers silent for more than twice this period are evicted.
    pub heartbeat_period: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            command_capacity: DEFAULT_COMMAND_CAPACITY,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            heartbeat_period: DEFAULT_HEARTBEAT_PERIOD,
        }
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

pub type SubscriberId = u64;

/// An item in a subscriber's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubMessage {
    /// Opaque encoded payload to forward verbatim.
    Payload(Bytes),
    /// Heartbeat probe; the transport should answer with [`BroadcastHub::ack`].
    Ping,
}

/// Identifies one registration in the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberHandle {
    pub id: SubscriberId,
    pub job_id: JobId,
    pub observer_id: Option<String>,
}

/// Returned by [`BroadcastHub::subscribe`].
///
/// The receiver yields `None` once the hub has removed the subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriberHandle,
    pub receiver: mpsc::Receiver<HubMessage>,
}

/// Why a subscriber left the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Receiver dropped or explicit unsubscribe.
    Closed,
    /// Outbound queue was full at publish time.
    Overflow,
    /// No heartbeat acknowledgement within twice the heartbeat period.
    Stale,
    Shutdown,
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("Broadcast hub is shut down")]
    Closed,
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

enum Command {
    Register {
        job_id: JobId,
        observer_id: Option<String>,
        reply: oneshot::Sender<Subscription>,
    },
    Unregister {
        job_id: JobId,
        id: SubscriberId,
    },
    Publish {
        job_id: JobId,
        payload: Bytes,
    },
    PublishAll {
        payload: Bytes,
    },
    Ack {
        job_id: JobId,
        id: SubscriberId,
    },
    Count {
        job_id: Option<JobId>,
        reply: oneshot::Sender<usize>,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Cloneable handle to the hub's coordination task.
#[derive(Clone)]
pub struct BroadcastHub {
    commands: mpsc::Sender<Command>,
}

impl BroadcastHub {
    /// Spawn the coordination task.
    ///
    /// The task stops when `cancel` fires, when [`shutdown`](Self::shutdown)
    /// is called, or when every handle has been dropped.
    pub fn spawn(config: HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.command_capacity.max(1));
        let hub_loop = HubLoop {
            config,
            jobs: HashMap::new(),
            next_id: 1,
        };
        let handle = tokio::spawn(hub_loop.run(rx, cancel));
        (Self { commands: tx }, handle)
    }

    async fn send(&self, command: Command) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Register a new subscriber for `job_id`.
    pub async fn subscribe(
        &self,
        job_id: impl Into<JobId>,
        observer_id: Option<String>,
    ) -> Result<Subscription, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Register {
            job_id: job_id.into(),
            observer_id,
            reply,
        })
        .await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub async fn unsubscribe(&self, handle: &SubscriberHandle) -> Result<(), HubError> {
        self.send(Command::Unregister {
            job_id: handle.job_id.clone(),
            id: handle.id,
        })
        .await
    }

    /// Deliver `payload` to every subscriber of `job_id`.
    pub async fn publish(
        &self,
        job_id: impl Into<JobId>,
        payload: impl Into<Bytes>,
    ) -> Result<(), HubError> {
        self.send(Command::Publish {
            job_id: job_id.into(),
            payload: payload.into(),
        })
        .await
    }

    /// Deliver `payload` to every subscriber of every job.
    pub async fn publish_all(&self, payload: impl Into<Bytes>) -> Result<(), HubError> {
        self.send(Command::PublishAll {
            payload: payload.into(),
        })
        .await
    }

    /// Record a heartbeat response from the subscriber's transport.
    pub async fn ack(&self, handle: &SubscriberHandle) -> Result<(), HubError> {
        self.send(Command::Ack {
            job_id: handle.job_id.clone(),
            id: handle.id,
        })
        .await
    }

    pub async fn subscriber_count(&self, job_id: &str) -> Result<usize, HubError> {
        self.count(Some(job_id.to_string())).await
    }

    pub async fn total_subscribers(&self) -> Result<usize, HubError> {
        self.count(None).await
    }

    async fn count(&self, job_id: Option<JobId>) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Count { job_id, reply }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Close every subscriber queue and stop the coordination task.
    ///
    /// Returns once all queues are closed. Calling it on a hub that has
    /// already stopped is a no-op.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.send(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Coordination loop
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriberState {
    Registered,
    /// Received traffic or acknowledged a heartbeat since the last ping.
    Active,
    /// Pinged and awaiting an acknowledgement.
    Idle,
}

struct Slot {
    sender: mpsc::Sender<HubMessage>,
    observer_id: Option<String>,
    state: SubscriberState,
    last_seen: Instant,
}

enum Delivery {
    Delivered,
    Dropped(DropReason),
}

fn deliver(slot: &mut Slot, message: HubMessage) -> Delivery {
    match slot.sender.try_send(message) {
        Ok(()) => Delivery::Delivered,
        Err(mpsc::error::TrySendError::Full(_)) => Delivery::Dropped(DropReason::Overflow),
        Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Dropped(DropReason::Closed),
    }
}

struct HubLoop {
    config: HubConfig,
    jobs: HashMap<JobId, HashMap<SubscriberId, Slot>>,
    next_id: SubscriberId,
}

impl HubLoop {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>, cancel: CancellationToken) {
        let period = self.config.heartbeat_period;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        tracing::info!(
            heartbeat_secs = period.as_secs(),
            buffer = self.config.subscriber_buffer,
            "Broadcast hub started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.heartbeat(),
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle(command) {
                            return;
                        }
                    }
                    None => break,
                },
            }
        }

        self.close_all();
    }

    /// Apply one command. Returns `false` once the hub should stop.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Register {
                job_id,
                observer_id,
                reply,
            } => self.register(job_id, observer_id, reply),
            Command::Unregister { job_id, id } => {
                self.remove(&job_id, &[id], DropReason::Closed);
            }
            Command::Publish { job_id, payload } => self.publish(&job_id, payload),
            Command::PublishAll { payload } => {
                let job_ids: Vec<JobId> = self.jobs.keys().cloned().collect();
                for job_id in job_ids {
                    self.publish(&job_id, payload.clone());
                }
            }
            Command::Ack { job_id, id } => {
                if let Some(slot) = self.jobs.get_mut(&job_id).and_then(|set| set.get_mut(&id)) {
                    slot.state = SubscriberState::Active;
                    slot.last_seen = Instant::now();
                }
            }
            Command::Count { job_id, reply } => {
                self.prune_closed();
                let count = match job_id {
                    Some(job_id) => self.jobs.get(&job_id).map_or(0, HashMap::len),
                    None => self.jobs.values().map(HashMap::len).sum(),
                };
                let _ = reply.send(count);
            }
            Command::Shutdown { done } => {
                self.close_all();
                let _ = done.send(());
                return false;
            }
        }
        true
    }

    fn register(
        &mut self,
        job_id: JobId,
        observer_id: Option<String>,
        reply: oneshot::Sender<Subscription>,
    ) {
        let id = self.next_id;
        self.next_id += 1;

        let (sender, receiver) = mpsc::channel(self.config.subscriber_buffer.max(1));
        let subscription = Subscription {
            handle: SubscriberHandle {
                id,
                job_id: job_id.clone(),
                observer_id: observer_id.clone(),
            },
            receiver,
        };
        // The caller gave up waiting; nothing to register.
        if reply.send(subscription).is_err() {
            return;
        }

        tracing::debug!(job_id = %job_id, subscriber_id = id, observer_id = ?observer_id, "Subscriber registered");
        self.jobs.entry(job_id).or_default().insert(
            id,
            Slot {
                sender,
                observer_id,
                state: SubscriberState::Registered,
                last_seen: Instant::now(),
            },
        );
    }

    fn publish(&mut self, job_id: &str, payload: Bytes) {
        let Some(set) = self.jobs.get_mut(job_id) else {
            return;
        };

        let mut dropped: Vec<(SubscriberId, DropReason)> = Vec::new();
        for (id, slot) in set.iter_mut() {
            match deliver(slot, HubMessage::Payload(payload.clone())) {
                Delivery::Delivered => {
                    if slot.state == SubscriberState::Registered {
                        slot.state = SubscriberState::Active;
                    }
                }
                Delivery::Dropped(reason) => dropped.push((*id, reason)),
            }
        }

        for (id, reason) in dropped {
            self.remove(job_id, &[id], reason);
        }
    }

    /// Evict silent subscribers, then ping everyone else.
    fn heartbeat(&mut self) {
        let now = Instant::now();
        let stale_after = self.config.heartbeat_period * 2;

        let mut dropped: Vec<(JobId, SubscriberId, DropReason)> = Vec::new();
        for (job_id, set) in self.jobs.iter_mut() {
            for (id, slot) in set.iter_mut() {
                if now.duration_since(slot.last_seen) > stale_after {
                    dropped.push((job_id.clone(), *id, DropReason::Stale));
                    continue;
                }
                match deliver(slot, HubMessage::Ping) {
                    Delivery::Delivered => slot.state = SubscriberState::Idle,
                    Delivery::Dropped(reason) => dropped.push((job_id.clone(), *id, reason)),
                }
            }
        }

        for (job_id, id, reason) in dropped {
            self.remove(&job_id, &[id], reason);
        }

        tracing::debug!(
            jobs = self.jobs.len(),
            subscribers = self.jobs.values().map(HashMap::len).sum::<usize>(),
            "Broadcast hub heartbeat"
        );
    }

    fn prune_closed(&mut self) {
        let closed: Vec<(JobId, SubscriberId)> = self
            .jobs
            .iter()
            .flat_map(|(job_id, set)| {
                set.iter()
                    .filter(|(_, slot)| slot.sender.is_closed())
                    .map(move |(id, _)| (job_id.clone(), *id))
            })
            .collect();
        for (job_id, id) in closed {
            self.remove(&job_id, &[id], DropReason::Closed);
        }
    }

    /// Remove subscribers. Dropping the slot closes its queue.
    fn remove(&mut self, job_id: &str, ids: &[SubscriberId], reason: DropReason) {
        let Some(set) = self.jobs.get_mut(job_id) else {
            return;
        };
        for id in ids {
            let Some(slot) = set.remove(id) else {
                continue;
            };
            match reason {
                DropReason::Overflow => tracing::warn!(
                    job_id = %job_id,
                    subscriber_id = id,
                    observer_id = ?slot.observer_id,
                    "Dropping slow subscriber: outbound queue full"
                ),
                DropReason::Stale => tracing::info!(
                    job_id = %job_id,
                    subscriber_id = id,
                    last_state = ?slot.state,
                    "Dropping stale subscriber: heartbeat not acknowledged"
                ),
                DropReason::Closed | DropReason::Shutdown => tracing::debug!(
                    job_id = %job_id,
                    subscriber_id = id,
                    reason = ?reason,
                    "Subscriber removed"
                ),
            }
        }
        if set.is_empty() {
            self.jobs.remove(job_id);
        }
    }

    fn close_all(&mut self) {
        let count: usize = self.jobs.values().map(HashMap::len).sum();
        self.jobs.clear();
        tracing::info!(count, reason = ?DropReason::Shutdown, "Broadcast hub stopped, closed all subscribers");
    }
}
