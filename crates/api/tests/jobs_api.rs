//! End-to-end tests of the job routes over in-process collaborators.

mod common;

use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, get, post_json, submit_body, submit_job};
use epdd_algo::RpcError;
use epdd_core::progress::ProgressEvent;

// ---------------------------------------------------------------------------
// Test: submission
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_returns_created_with_pending_job() {
    let test = common::build_test_app();
    let response = post_json(test.app(), "/api/v1/jobs", submit_body()).await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "PENDING");
    let job_id = json["data"]["job_id"].as_str().unwrap();
    assert_eq!(job_id.len(), 36);
    assert_eq!(test.worker.submit_calls.load(Ordering::SeqCst), 1);

    let json = body_json(get(test.app(), &format!("/api/v1/jobs/{job_id}")).await).await;
    assert_eq!(json["data"]["scheme_code"], "KBM-WF01");
    assert_eq!(json["data"]["data_ref"], "sample_001");
    assert_eq!(json["data"]["params"]["window"], 5);
}

#[tokio::test]
async fn invalid_submission_is_rejected() {
    let test = common::build_test_app();
    let mut body = submit_body();
    body["scheme"] = "".into();

    let response = post_json(test.app(), "/api/v1/jobs", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "VALIDATION_ERROR");
    assert_eq!(test.worker.submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn malformed_body_gets_json_error_envelope() {
    let test = common::build_test_app();
    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/jobs")
        .header("content-type", "application/json")
        .body(Body::from("{\"scheme\": "))
        .unwrap();

    let response = common::send(test.app(), request).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "BAD_REQUEST");
    assert!(!json["error"].as_str().unwrap().is_empty());
    assert_eq!(test.worker.submit_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_status_filter_gets_json_error_envelope() {
    let test = common::build_test_app();
    let response = get(test.app(), "/api/v1/jobs?status=BOGUS").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn worker_refusal_returns_bad_gateway_and_keeps_failed_job() {
    let test = common::build_test_app();
    *test.worker.submit_error.lock().unwrap() = Some(RpcError::Transient("refused".into()));

    let response = post_json(test.app(), "/api/v1/jobs", submit_body()).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["code"], "UPSTREAM_ERROR");

    let json = body_json(get(test.app(), "/api/v1/jobs?status=FAILED").await).await;
    assert_eq!(json["data"]["total"], 1);
    let error_log = json["data"]["items"][0]["error_log"].as_str().unwrap();
    assert!(error_log.starts_with("Failed to submit to algorithm service"));
}

#[tokio::test]
async fn unknown_scheme_rejected_once_schemes_are_cached() {
    let test = common::build_test_app();
    let response = get(test.app(), "/api/v1/algorithms/schemes").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"][0]["code"], "KBM-WF01");

    let mut body = submit_body();
    body["scheme"] = "NOPE-01".into();
    let response = post_json(test.app(), "/api/v1/jobs", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let mut body = submit_body();
    body["params"] = serde_json::json!({});
    let response = post_json(test.app(), "/api/v1/jobs", body).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("window"));
}

// ---------------------------------------------------------------------------
// Test: worker callback and result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn callback_finishes_job_and_duplicate_is_acknowledged() {
    let test = common::build_test_app();
    let job_id = submit_job(&test).await;
    let callback = format!("/api/v1/internal/tasks/{job_id}/result");
    let report = serde_json::json!({
        "status": "SUCCESS",
        "result": {"payload": {"score": 0.9}, "rows": 3},
    });

    let response = post_json(test.app(), &callback, report.clone()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Result recorded");

    let json = body_json(get(test.app(), &format!("/api/v1/jobs/{job_id}/result")).await).await;
    assert_eq!(json["data"]["status"], "SUCCESS");
    assert_eq!(json["data"]["result"]["payload"]["score"], 0.9);
    assert_eq!(json["data"]["result"]["rows"], 3);

    // The worker retries its callback; nothing changes.
    let failed = serde_json::json!({"status": "FAILED", "error_message": "late"});
    let json = body_json(post_json(test.app(), &callback, failed).await).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Job already finished");

    let json = body_json(get(test.app(), &format!("/api/v1/jobs/{job_id}")).await).await;
    assert_eq!(json["data"]["status"], "SUCCESS");
    assert_eq!(json["data"]["progress"], 100);
}

#[tokio::test]
async fn callback_for_unknown_job_is_404() {
    let test = common::build_test_app();
    let report = serde_json::json!({"status": "FAILED", "error_message": "boom"});

    let response = post_json(test.app(), "/api/v1/internal/tasks/nope/result", report).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id nope not found");
}

#[tokio::test]
async fn result_of_unfinished_job_is_not_completed() {
    let test = common::build_test_app();
    let job_id = submit_job(&test).await;

    let response = get(test.app(), &format!("/api/v1/jobs/{job_id}/result")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "NOT_COMPLETED");
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_then_late_progress_is_ignored() {
    let test = common::build_test_app();
    let job_id = submit_job(&test).await;
    test.lifecycle
        .record_progress(&ProgressEvent::new(job_id.clone(), 30, "working"))
        .await
        .unwrap();

    let response = post_json(
        test.app(),
        &format!("/api/v1/jobs/{job_id}/cancel?force=true"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["success"], true);
    assert_eq!(json["data"]["force"], true);
    assert_eq!(json["data"]["status"], "CANCELLED");

    test.lifecycle
        .record_progress(&ProgressEvent::new(job_id.clone(), 80, "still going"))
        .await
        .unwrap();
    let json = body_json(get(test.app(), &format!("/api/v1/jobs/{job_id}")).await).await;
    assert_eq!(json["data"]["status"], "CANCELLED");
    assert_eq!(json["data"]["progress"], 30);

    // A second cancel never reaches the worker.
    let response = post_json(
        test.app(),
        &format!("/api/v1/jobs/{job_id}/cancel"),
        serde_json::json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "NOT_CANCELLABLE");
    assert_eq!(test.worker.cancel_calls.load(Ordering::SeqCst), 1);
}

// ---------------------------------------------------------------------------
// Test: listing and stats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_filters_and_paginates() {
    let test = common::build_test_app();
    for _ in 0..3 {
        submit_job(&test).await;
    }
    let mut other = submit_body();
    other["user_id"] = "u2".into();
    let response = post_json(test.app(), "/api/v1/jobs", other).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let json = body_json(get(test.app(), "/api/v1/jobs?user_id=u1&page_size=2").await).await;
    assert_eq!(json["data"]["total"], 3);
    assert_eq!(json["data"]["pages"], 2);
    assert_eq!(json["data"]["page_size"], 2);
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 2);

    let json = body_json(get(test.app(), "/api/v1/jobs?user_id=u1&page=2&page_size=2").await).await;
    assert_eq!(json["data"]["items"].as_array().unwrap().len(), 1);

    let json = body_json(get(test.app(), "/api/v1/stats").await).await;
    assert_eq!(json["data"]["total"], 4);
    assert_eq!(json["data"]["status_counts"]["PENDING"], 4);
    assert_eq!(json["data"]["status_counts"]["SUCCESS"], 0);
}

#[tokio::test]
async fn unknown_job_is_404() {
    let test = common::build_test_app();
    let response = get(test.app(), "/api/v1/jobs/does-not-exist").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}
