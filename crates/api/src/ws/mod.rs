//! WebSocket progress streaming for job observers.

pub mod handler;

pub use handler::progress_ws;
