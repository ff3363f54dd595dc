use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use epdd_core::job_events::{
    WsEnvelope, MSG_TYPE_JOB_CANCELLED, MSG_TYPE_JOB_ERROR, MSG_TYPE_JOB_PROGRESS,
    MSG_TYPE_JOB_RESULT, MSG_TYPE_JOB_SNAPSHOT,
};
use epdd_core::progress::ProgressEvent;
use epdd_core::types::Timestamp;
use epdd_db::models::job::Job;
use epdd_events::{HubMessage, Subscription};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extract::AppQuery;
use crate::state::AppState;

/// Query parameters for the progress WebSocket.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    /// Free-form label identifying the observer in logs.
    pub observer: Option<String>,
}

/// GET /api/v1/jobs/{id}/ws -- upgrade to a progress stream for one job.
///
/// Unknown jobs are rejected with 404 before the upgrade.
pub async fn progress_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    AppQuery(params): AppQuery<WsParams>,
) -> AppResult<Response> {
    let job = state.service.get_job(&job_id).await?;
    let observer = params
        .observer
        .filter(|o| !o.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, job, observer)))
}

/// Manage a single observer connection after upgrade.
///
/// A finished job gets one snapshot frame and a close. Otherwise:
///   1. Registers with the broadcast hub.
///   2. Re-checks the job, in case it finished before registration.
///   3. Sends the cached progress snapshot, if any.
///   4. Spawns a sender task forwarding hub messages to the sink, skipping
///      progress older than that snapshot. It closes the socket after a
///      terminal envelope.
///   5. Spawns a receiver task acknowledging inbound frames to the hub.
///   6. Unregisters once either task ends.
async fn handle_socket(socket: WebSocket, state: AppState, job: Job, observer: String) {
    let job_id = job.job_id.clone();
    tracing::info!(job_id = %job_id, observer = %observer, "Progress observer connected");

    let (mut sink, mut stream) = socket.split();

    if job.status.is_terminal() {
        send_final_snapshot(&mut sink, &job).await;
        return;
    }

    let Subscription {
        handle,
        mut receiver,
    } = match state.hub.subscribe(job_id.clone(), Some(observer)).await {
        Ok(subscription) => subscription,
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Broadcast hub unavailable");
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    match state.service.get_job(&job_id).await {
        Ok(current) if current.status.is_terminal() => {
            let _ = state.hub.unsubscribe(&handle).await;
            send_final_snapshot(&mut sink, &current).await;
            return;
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(job_id = %job_id, error = %e, "Job lookup failed after subscribe");
            let _ = state.hub.unsubscribe(&handle).await;
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    }

    // Events queued since subscribing may predate the snapshot.
    let mut watermark = None;
    if let Some(snapshot) = state.lifecycle().progress_snapshot(&job_id).await {
        let payload = serde_json::to_value(&snapshot).unwrap_or_default();
        let envelope = WsEnvelope::for_job(MSG_TYPE_JOB_PROGRESS, job_id.clone(), payload);
        if let Ok(text) = serde_json::to_string(&envelope) {
            let _ = sink.send(Message::Text(text.into())).await;
            watermark = Some(snapshot.timestamp);
        }
    }

    // Sender task: forward hub messages to the WebSocket sink.
    let sender_job_id = job_id.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = receiver.recv().await {
            let (frame, terminal) = match message {
                HubMessage::Payload(bytes) => {
                    let terminal = match classify(&bytes, watermark) {
                        Forward::Skip => continue,
                        Forward::Send { terminal } => terminal,
                    };
                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => (Message::Text(text.into()), terminal),
                        Err(_) => continue,
                    }
                }
                HubMessage::Ping => (Message::Ping(Default::default()), false),
            };
            if sink.send(frame).await.is_err() {
                tracing::debug!(job_id = %sender_job_id, "WebSocket sink closed");
                return;
            }
            if terminal {
                break;
            }
        }
        // Terminal envelope delivered, or the hub dropped this subscriber.
        let _ = sink.send(Message::Close(None)).await;
    });

    // Receiver task: any inbound frame counts as a heartbeat response.
    let ack_hub = state.hub.clone();
    let ack_handle = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = stream.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Pong(_)) => {
                    tracing::trace!(job_id = %ack_handle.job_id, "Pong received");
                    if ack_hub.ack(&ack_handle).await.is_err() {
                        break;
                    }
                }
                Ok(_) => {
                    if ack_hub.ack(&ack_handle).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!(job_id = %ack_handle.job_id, error = %e, "WebSocket receive error");
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    let _ = state.hub.unsubscribe(&handle).await;
    tracing::info!(job_id = %job_id, "Progress observer disconnected");
}

/// Send the finished job as a single snapshot frame, then close.
async fn send_final_snapshot(sink: &mut SplitSink<WebSocket, Message>, job: &Job) {
    let payload = serde_json::to_value(job).unwrap_or_default();
    let envelope = WsEnvelope::for_job(MSG_TYPE_JOB_SNAPSHOT, job.job_id.clone(), payload);
    if let Ok(text) = serde_json::to_string(&envelope) {
        let _ = sink.send(Message::Text(text.into())).await;
    }
    let _ = sink.send(Message::Close(None)).await;
    tracing::debug!(job_id = %job.job_id, status = %job.status, "Sent final snapshot");
}

/// What the sender task does with one hub payload.
#[derive(Debug, PartialEq, Eq)]
enum Forward {
    Send { terminal: bool },
    Skip,
}

/// Classify an encoded envelope. Progress no newer than `watermark` (the
/// snapshot already sent) is skipped; terminal envelopes end the stream.
fn classify(bytes: &[u8], watermark: Option<Timestamp>) -> Forward {
    let Ok(envelope) = serde_json::from_slice::<WsEnvelope>(bytes) else {
        return Forward::Send { terminal: false };
    };
    match envelope.msg_type.as_str() {
        MSG_TYPE_JOB_RESULT | MSG_TYPE_JOB_ERROR | MSG_TYPE_JOB_CANCELLED => {
            Forward::Send { terminal: true }
        }
        MSG_TYPE_JOB_PROGRESS => {
            let stale = watermark.is_some_and(|seen| {
                serde_json::from_value::<ProgressEvent>(envelope.payload)
                    .is_ok_and(|event| event.timestamp <= seen)
            });
            if stale {
                Forward::Skip
            } else {
                Forward::Send { terminal: false }
            }
        }
        _ => Forward::Send { terminal: false },
    }
}
