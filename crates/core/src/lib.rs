//! Shared domain types for the algorithm job orchestration backend.
//!
//! This crate has no internal dependencies. It holds the identifiers,
//! error taxonomy, progress/scheme/report models and WebSocket message
//! constants used by every other crate in the workspace.

pub mod error;
pub mod job_events;
pub mod progress;
pub mod report;
pub mod scheme;
pub mod submission;
pub mod types;
