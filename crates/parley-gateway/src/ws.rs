// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket push of live updates.
//!
//! Server -> Client (JSON, one update per text frame):
//! ```json
//! {"type": "new_message", "conversationId": "...", "channelId": "...", "messageId": "..."}
//! {"type": "conversation_updated", "conversationId": "...", "channelId": "..."}
//! {"type": "message_status", "conversationId": "...", "channelId": "...", "messageId": "...", "status": "DELIVERED"}
//! ```
//!
//! Client frames are ignored apart from close.

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};

use crate::error::ApiResult;
use crate::server::GatewayState;
use crate::sse::{LiveQuery, live_stream};

/// GET /v1/live
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    query: Result<Query<LiveQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let Query(filter) = query?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, filter)))
}

async fn handle_socket(socket: WebSocket, state: GatewayState, filter: LiveQuery) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let updates = live_stream(state.engine.bus().subscribe_live(), filter);
    tokio::pin!(updates);
    tracing::debug!("live websocket connected");

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(update) = update else { break };
                let text = match serde_json::to_string(&update) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode live update");
                        continue;
                    }
                };
                if ws_sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("live websocket closed");
}
