//! WebSocket endpoint starting one voice session per connection

use std::sync::Arc;

use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::SinkExt;

use super::ApiState;
use crate::bot::build_bot;
use crate::transport::{ServerEvent, websocket};

/// Build WebSocket router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<Arc<ApiState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ApiState>) {
    let session = match build_bot(&state.config) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(error = %e, "failed to build voice session");
            let error = ServerEvent::Error {
                message: e.to_string(),
            };
            if let Ok(text) = serde_json::to_string(&error) {
                let _ = socket.send(Message::Text(text.into())).await;
            }
            let _ = socket.close().await;
            return;
        }
    };

    websocket::serve(socket, session.transport).await;
}
