//! Resilient client for the remote algorithm worker.
//!
//! Unary calls are JSON over HTTP ([`api::AlgoApi`]); progress is a
//! WebSocket stream ([`stream`]). [`client::AlgoClient`] wraps both with an
//! admission gate, retry with exponential backoff and a connection-health
//! observer, and exposes them through the [`rpc::WorkerRpc`] trait.

pub mod api;
pub mod client;
pub mod error;
pub mod gate;
pub mod health;
pub mod messages;
pub mod retry;
pub mod rpc;
pub mod stream;

pub use client::{AlgoClient, AlgoClientConfig};
pub use error::RpcError;
pub use health::ConnectionState;
pub use messages::{Ack, CancelResponse, FrameStatus, HealthStatus, ProgressFrame, SubmitTask};
pub use rpc::{ProgressFrames, WorkerRpc};
