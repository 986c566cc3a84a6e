//! WebSocket event streaming.
//!
//! One endpoint serves every run: each message is a single-line JSON event
//! carrying its `runId`, and clients filter locally. A client that stops
//! reading long enough to fill its queue is dropped by the bus.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;

use super::ApiState;

/// GET /ws -- live event stream.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ApiState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state))
}

async fn handle_ws(mut socket: WebSocket, state: Arc<ApiState>) {
    let rx = state.bus.subscribe();
    while let Ok(event) = rx.recv_async().await {
        let json = serde_json::to_string(&event).unwrap_or_default();
        if socket.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}
