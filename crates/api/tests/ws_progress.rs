//! Progress WebSocket tests against a live listener.

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use common::{submit_job, TestApp};
use epdd_core::progress::ProgressEvent;
use epdd_core::report::ResultSummary;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

async fn serve(test: &TestApp) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = test.app();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn connect(addr: SocketAddr, job_id: &str) -> Client {
    let url = format!("ws://{addr}/api/v1/jobs/{job_id}/ws?observer=test");
    let (client, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    client
}

/// Next text frame as JSON, skipping pings.
async fn next_json(client: &mut Client) -> serde_json::Value {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

async fn expect_close(client: &mut Client) {
    let message = tokio::time::timeout(Duration::from_secs(2), client.next())
        .await
        .expect("timed out waiting for close");
    match message {
        Some(Ok(Message::Close(_))) | None => {}
        other => panic!("expected close, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// Test: live progress then terminal result
// ---------------------------------------------------------------------------

#[tokio::test]
async fn observer_gets_snapshot_progress_and_result() {
    let test = common::build_test_app();
    let addr = serve(&test).await;
    let job_id = submit_job(&test).await;
    test.lifecycle
        .record_progress(&ProgressEvent::new(job_id.clone(), 10, "loading"))
        .await
        .unwrap();

    let mut client = connect(addr, &job_id).await;

    // Cached snapshot first.
    let first = next_json(&mut client).await;
    assert_eq!(first["type"], "progress");
    assert_eq!(first["payload"]["percentage"], 10);

    common::wait_for_subscribers(&test, &job_id, 1).await;

    test.lifecycle
        .record_progress(&ProgressEvent::new(job_id.clone(), 60, "fitting"))
        .await
        .unwrap();
    let progress = next_json(&mut client).await;
    assert_eq!(progress["type"], "progress");
    assert_eq!(progress["job_id"], job_id.as_str());
    assert_eq!(progress["payload"]["percentage"], 60);
    assert_eq!(progress["payload"]["message"], "fitting");

    test.lifecycle
        .finish_job(&job_id, &ResultSummary::new(serde_json::json!({"score": 0.9})))
        .await
        .unwrap();
    let result = next_json(&mut client).await;
    assert_eq!(result["type"], "result");
    assert_eq!(result["payload"]["status"], "SUCCESS");

    expect_close(&mut client).await;
    common::wait_for_subscribers(&test, &job_id, 0).await;
}

// ---------------------------------------------------------------------------
// Test: finished job gets one snapshot then close
// ---------------------------------------------------------------------------

#[tokio::test]
async fn finished_job_gets_final_snapshot_and_close() {
    let test = common::build_test_app();
    let addr = serve(&test).await;
    let job_id = submit_job(&test).await;
    test.lifecycle.fail_job(&job_id, "worker crashed").await.unwrap();

    let mut client = connect(addr, &job_id).await;

    let snapshot = next_json(&mut client).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["payload"]["status"], "FAILED");
    assert_eq!(snapshot["payload"]["error_log"], "worker crashed");

    expect_close(&mut client).await;
    assert_eq!(test.state.hub.subscriber_count(&job_id).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Test: unknown job is rejected before upgrade
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_job_rejects_upgrade() {
    let test = common::build_test_app();
    let addr = serve(&test).await;

    let url = format!("ws://{addr}/api/v1/jobs/missing/ws");
    let err = tokio_tungstenite::connect_async(url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 404);
        }
        other => panic!("expected HTTP 404, got {other:?}"),
    }
}
