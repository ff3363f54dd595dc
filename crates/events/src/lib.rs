//! Real-time fan-out of job progress to WebSocket observers.
//!
//! - [`BroadcastHub`]: cloneable handle to the hub's coordination task,
//!   which owns every per-job subscriber set.
//! - [`Subscription`]: a subscriber's handle plus its bounded outbound
//!   queue of [`HubMessage`]s.

pub mod hub;

pub use hub::{
    BroadcastHub, DropReason, HubConfig, HubError, HubMessage, SubscriberHandle, SubscriberId,
    Subscription,
};
