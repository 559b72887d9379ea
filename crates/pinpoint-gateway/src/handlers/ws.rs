//! WebSocket endpoint: `/ws`.
//!
//! Clients subscribe with `?family=<f>` and optionally `&device=<d>`.
//! Without a device filter the connection receives the family-wide `"all"`
//! copies, one per delivery; with a filter it receives only that device's
//! copies.

use std::collections::HashMap;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use pinpoint_core::normalize_name;

use crate::error::ApiError;
use crate::state::AppState;

/// Upgrade to a WebSocket subscribed to one `(family, device)` topic.
pub async fn websocket(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let family = normalize_name(params.get("family").map_or("", String::as_str));
    if family.is_empty() {
        return Err(ApiError::BadRequest("family is required".to_string()));
    }
    let device = params
        .get("device")
        .map_or_else(|| "all".to_string(), |d| normalize_name(d));

    let rx = state.hub.subscribe();
    tracing::debug!(%family, %device, "websocket subscribed");
    Ok(ws
        .on_upgrade(move |socket| serve_socket(socket, rx, family, device))
        .into_response())
}

async fn serve_socket(
    socket: WebSocket,
    mut rx: broadcast::Receiver<crate::hub::HubMessage>,
    family: String,
    device: String,
) {
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            broadcast = rx.recv() => match broadcast {
                Ok(msg) => {
                    if msg.family == family && msg.device == device {
                        if sender.send(Message::Text(msg.payload.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(%family, %device, lagged = n, "websocket client lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = receiver.next() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!(%family, %device, "websocket closed");
}
