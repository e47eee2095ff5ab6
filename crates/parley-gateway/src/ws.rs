use crate::server::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tracing::{debug, info};

/// Keep-alive ping cadence on the write side.
const PING_INTERVAL: Duration = Duration::from_secs(54);
/// Deadline on each outbound write (frames and pings alike).
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// The reader expects a frame (usually the pong) at least this often.
const READ_DEADLINE: Duration = Duration::from_secs(60);

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(manager): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if manager.get_session(&session_id).await.is_err() {
        return StatusCode::NOT_FOUND.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, manager, session_id))
}

async fn handle_socket(socket: WebSocket, manager: AppState, session_id: String) {
    let (subscriber_id, mut frames) = manager.hub().register(&session_id).await;
    info!(session_id = %session_id, subscriber = %subscriber_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    // Write pump: relay hub frames as JSON text, ping on the keep-alive
    // cadence, and bail on any slow or failed write.
    let mut write_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                frame = frames.recv() => {
                    let Some(frame) = frame else { break };
                    let Ok(text) = serde_json::to_string(&frame) else { continue };
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Text(text.into()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
                _ = ping.tick() => {
                    match tokio::time::timeout(WRITE_TIMEOUT, sink.send(Message::Ping(Vec::new().into()))).await {
                        Ok(Ok(())) => {}
                        _ => break,
                    }
                }
            }
        }
    });

    // Read pump: client frames carry no commands and are ignored, but every
    // frame (pongs included) refreshes the read deadline.
    let mut read_task = tokio::spawn(async move {
        loop {
            match tokio::time::timeout(READ_DEADLINE, stream.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                Ok(Some(Ok(other))) => {
                    debug!(frame = ?other, "client frame ignored");
                }
                Ok(Some(Err(_))) | Err(_) => break,
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    manager.hub().unregister(subscriber_id).await;
    info!(session_id = %session_id, subscriber = %subscriber_id, "websocket disconnected");
}
