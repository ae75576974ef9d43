//! WebSocket handler for real-time download events

use crate::{logging, AppState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe to item changes
    let mut events = state.download_manager.subscribe();

    info!(target: logging::APPLICATION, "WebSocket client connected");

    // Spawn task to forward events to client
    let send_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target: logging::APPLICATION, "WebSocket client lagged by {} events", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let msg = match serde_json::to_string(&event) {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(target: logging::APPLICATION, "Failed to encode event: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(msg.into())).await.is_err() {
                break;
            }
        }
    });

    // The stream is one-way; incoming messages only matter for closing
    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Close(_)) => {
                info!(target: logging::APPLICATION, "WebSocket client disconnected");
                break;
            }
            Ok(Message::Text(text)) => {
                debug!(target: logging::APPLICATION, "Ignoring WebSocket message: {}", text.as_str());
            }
            Err(e) => {
                debug!(target: logging::APPLICATION, "WebSocket error: {}", e);
                break;
            }
            _ => {}
        }
    }

    // Cancel the send task when client disconnects
    send_task.abort();
}
