//! Per-identity sliding-window rate limiting.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use epdd_core::error::CoreError;
use epdd_pipeline::RateDecision;

use crate::error::AppError;
use crate::middleware::USER_ID_HEADER;
use crate::state::AppState;

/// Identity used when a request carries neither a user id nor a
/// forwarded address.
pub const ANONYMOUS: &str = "anonymous";

/// The identity a request is counted against: `X-User-ID`, else the first
/// `X-Forwarded-For` hop, else [`ANONYMOUS`].
pub fn client_identity(headers: &HeaderMap) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(user) = header(USER_ID_HEADER) {
        return format!("user:{user}");
    }
    header("x-forwarded-for")
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(|ip| format!("ip:{ip}"))
        .unwrap_or_else(|| ANONYMOUS.to_string())
}

/// Axum middleware rejecting requests over the per-identity limit with
/// 429 and a `Retry-After` header.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let identity = client_identity(request.headers());

    match state.rate_limiter.check(&identity).await {
        RateDecision::Allowed { remaining } => {
            let mut response = next.run(request).await;
            response.headers_mut().insert(
                "x-ratelimit-limit",
                HeaderValue::from(state.rate_limiter.limit()),
            );
            response
                .headers_mut()
                .insert("x-ratelimit-remaining", HeaderValue::from(remaining));
            Ok(response)
        }
        RateDecision::Limited { retry_after_secs } => {
            tracing::warn!(identity = %identity, retry_after_secs, "Rate limit exceeded");
            Err(CoreError::RateLimited { retry_after_secs }.into())
        }
    }
}
