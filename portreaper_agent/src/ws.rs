//! WebSocket channel for pollers that keep one connection open.
//! Each text request is answered with exactly one JSON text frame.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::stream::StreamExt;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::api::{snapshot_view, MAX_LOG_LIMIT};
use crate::error::ApiError;
use crate::state::AppState;
use crate::types::PortFilter;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    while let Some(Ok(msg)) = socket.next().await {
        match msg {
            Message::Text(text) => {
                let reply = respond(&state, text.trim()).await;
                if socket.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!("ws client disconnected");
}

fn to_value<T: serde::Serialize>(v: &T) -> Value {
    serde_json::to_value(v)
        .unwrap_or_else(|e| json!({ "error": "SERIALIZATION", "message": e.to_string() }))
}

fn error_value(e: ApiError) -> Value {
    warn!("ws request failed: {e}");
    json!({ "error": "INTERNAL_ERROR", "message": e.to_string() })
}

pub async fn respond(state: &AppState, request: &str) -> Value {
    match request {
        "get_ports" => match snapshot_view(state, PortFilter::default()).await {
            Ok(view) => to_value(&view.ports),
            Err(e) => error_value(e),
        },
        "get_stats" => match snapshot_view(state, PortFilter::default()).await {
            Ok(view) => to_value(&view.stats),
            Err(e) => error_value(e),
        },
        "get_snapshot" => match snapshot_view(state, PortFilter::default()).await {
            Ok(view) => to_value(&view),
            Err(e) => error_value(e),
        },
        "get_logs" => to_value(&state.log.recent(MAX_LOG_LIMIT)),
        other => json!({ "error": "UNKNOWN_REQUEST", "request": other }),
    }
}
