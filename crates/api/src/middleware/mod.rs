pub mod rate_limit;

pub use rate_limit::{client_identity, rate_limit};

/// Header carrying the caller's idempotency key on `POST /jobs`.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// Header carrying the caller's user identity.
pub const USER_ID_HEADER: &str = "x-user-id";
