//! Idempotency and rate limiting as seen through HTTP.

mod common;

use std::sync::atomic::Ordering;

use axum::http::StatusCode;
use common::{body_json, get, post_json, post_json_with, submit_body};

// ---------------------------------------------------------------------------
// Test: idempotency key
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repeated_idempotency_key_returns_conflict() {
    let test = common::build_test_app();
    let headers = [("Idempotency-Key", "order-42")];

    let first = post_json_with(test.app(), "/api/v1/jobs", submit_body(), &headers).await;
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = post_json_with(test.app(), "/api/v1/jobs", submit_body(), &headers).await;
    assert_eq!(second.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(second).await["code"], "DUPLICATE_REQUEST");

    // Only one job was created and dispatched.
    assert_eq!(test.worker.submit_calls.load(Ordering::SeqCst), 1);
    let json = body_json(get(test.app(), "/api/v1/jobs").await).await;
    assert_eq!(json["data"]["total"], 1);

    // Without a key, duplicates are allowed.
    let third = post_json(test.app(), "/api/v1/jobs", submit_body()).await;
    assert_eq!(third.status(), StatusCode::CREATED);
}

// ---------------------------------------------------------------------------
// Test: rate limiting
// ---------------------------------------------------------------------------

fn limited_app(limit: u64) -> common::TestApp {
    let mut config = common::test_config();
    config.rate_limit_per_minute = limit;
    common::build_test_app_with(config)
}

async fn get_as(test: &common::TestApp, user: &str) -> axum::http::Response<axum::body::Body> {
    let request = axum::http::Request::builder()
        .uri("/api/v1/stats")
        .header("X-User-ID", user)
        .body(axum::body::Body::empty())
        .unwrap();
    common::send(test.app(), request).await
}

#[tokio::test]
async fn requests_over_the_limit_get_429_with_retry_after() {
    let test = limited_app(3);

    for expected_remaining in ["2", "1", "0"] {
        let response = get_as(&test, "alice").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert_eq!(response.headers()["x-ratelimit-remaining"], expected_remaining);
    }

    let response = get_as(&test, "alice").await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    // At most the rest of this minute plus a third of the next, when a
    // full bucket of 3 has decayed to 2.
    assert!((1..=80).contains(&retry_after));
    assert_eq!(body_json(response).await["code"], "RATE_LIMITED");

    // Another identity has its own budget.
    assert_eq!(get_as(&test, "bob").await.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_and_worker_callback_are_not_limited() {
    let test = limited_app(1);
    let report = serde_json::json!({"status": "FAILED", "error_message": "boom"});

    for _ in 0..3 {
        assert_eq!(get(test.app(), "/health").await.status(), StatusCode::OK);
        let response =
            post_json(test.app(), "/api/v1/internal/tasks/nope/result", report.clone()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

#[tokio::test]
async fn cache_outage_fails_open() {
    let test = limited_app(1);
    test.cache.set_offline(true);

    for _ in 0..3 {
        assert_eq!(get_as(&test, "alice").await.status(), StatusCode::OK);
    }
}
