//! WebSocket progress stream from the worker.

use futures::StreamExt;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::connect_async_with_config;

use crate::error::RpcError;
use crate::messages::{parse_frame, ProgressFrame};
use crate::rpc::ProgressFrames;

/// Default ceiling on a single progress message (100 MB).
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 100 * 1024 * 1024;

/// `{ws_url}/tasks/{job_id}/progress`
pub fn progress_url(ws_url: &str, job_id: &str) -> String {
    format!("{}/tasks/{}/progress", ws_url.trim_end_matches('/'), job_id)
}

/// Connect to a progress endpoint and decode its messages into frames.
///
/// Control frames are skipped. A clean close ends the stream; any other
/// transport error is yielded once as [`RpcError::Stream`].
pub async fn open(url: &str, max_message_bytes: usize) -> Result<ProgressFrames, RpcError> {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(max_message_bytes);
    config.max_frame_size = Some(max_message_bytes);

    let (ws_stream, _response) = connect_async_with_config(url, Some(config), false)
        .await
        .map_err(|e| RpcError::Transient(format!("Failed to open progress stream at {url}: {e}")))?;

    tracing::debug!(url = %url, "Progress stream connected");

    let frames = ws_stream.filter_map(|message| async move { decode(message) });
    Ok(frames.boxed())
}

fn decode(message: Result<Message, WsError>) -> Option<Result<ProgressFrame, RpcError>> {
    match message {
        Ok(Message::Text(text)) => Some(parse_frame(&text).map_err(RpcError::from)),
        Ok(Message::Binary(bytes)) => Some(serde_json::from_slice(&bytes).map_err(RpcError::from)),
        Ok(_) => None,
        Err(WsError::ConnectionClosed) | Err(WsError::AlreadyClosed) => None,
        Err(e) => Some(Err(RpcError::Stream(e.to_string()))),
    }
}
