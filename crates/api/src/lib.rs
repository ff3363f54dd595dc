//! Submission gateway for the algorithm job orchestration backend.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! WebSocket progress handler) so integration tests and the binary
//! entrypoint share them.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
