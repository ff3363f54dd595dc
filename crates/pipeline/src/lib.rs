//! Job orchestration: lifecycle state machine, progress relay, the
//! gateway-facing job service, request guards and periodic reconciliation.

pub mod error;
pub mod guard;
pub mod lifecycle;
pub mod reconcile;
pub mod relay;
pub mod service;

pub use error::PipelineError;
pub use guard::{IdempotencyGuard, RateDecision, RateLimiter};
pub use lifecycle::{JobLifecycle, LifecycleConfig, ProgressOutcome, Transition};
pub use reconcile::{ReconcileConfig, ReconcileScheduler};
pub use service::{CancelOutcome, JobService, ReportAck, SubmitReceipt};
