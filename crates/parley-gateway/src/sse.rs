// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-Sent Events stream of live updates.
//!
//! Event format:
//! ```text
//! event: new_message
//! data: {"type":"new_message","conversationId":"...","channelId":"...","messageId":"..."}
//! ```

use std::convert::Infallible;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use parley_core::LiveUpdate;
use serde::Deserialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::error::ApiResult;
use crate::server::GatewayState;

/// Optional narrowing of a live subscription.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveQuery {
    pub conversation_id: Option<String>,
    pub channel_id: Option<String>,
}

impl LiveQuery {
    pub fn matches(&self, update: &LiveUpdate) -> bool {
        let conversation_ok = self
            .conversation_id
            .as_deref()
            .is_none_or(|id| id == update.conversation_id());
        let channel_ok = self
            .channel_id
            .as_deref()
            .is_none_or(|id| id == update.channel_id());
        conversation_ok && channel_ok
    }
}

/// The `type` tag of an update, used as the SSE event name.
pub fn event_name(update: &LiveUpdate) -> &'static str {
    match update {
        LiveUpdate::NewMessage { .. } => "new_message",
        LiveUpdate::ConversationUpdated { .. } => "conversation_updated",
        LiveUpdate::MessageStatus { .. } => "message_status",
    }
}

/// Updates from the bus that pass `filter`. Lagging receivers skip ahead.
pub fn live_stream(
    rx: broadcast::Receiver<LiveUpdate>,
    filter: LiveQuery,
) -> impl Stream<Item = LiveUpdate> + Send + 'static {
    stream::unfold((rx, filter), |(mut rx, filter)| async move {
        loop {
            match rx.recv().await {
                Ok(update) if filter.matches(&update) => return Some((update, (rx, filter))),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "live subscriber lagged, updates dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    })
}

/// GET /v1/live/events
pub async fn live_events(
    State(state): State<GatewayState>,
    query: Result<Query<LiveQuery>, QueryRejection>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let Query(filter) = query?;
    let rx = state.engine.bus().subscribe_live();
    let events = live_stream(rx, filter).filter_map(|update| async move {
        match Event::default().event(event_name(&update)).json_data(&update) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode live update");
                None
            }
        }
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(conversation: &str) -> LiveUpdate {
        LiveUpdate::ConversationUpdated {
            conversation_id: conversation.into(),
            channel_id: "wa".into(),
        }
    }

    #[test]
    fn filter_by_conversation() {
        let filter = LiveQuery {
            conversation_id: Some("c1".into()),
            channel_id: None,
        };
        assert!(filter.matches(&update("c1")));
        assert!(!filter.matches(&update("c2")));
        assert!(LiveQuery::default().matches(&update("c2")));
    }

    #[tokio::test]
    async fn stream_skips_filtered_updates() {
        let (tx, rx) = broadcast::channel(8);
        let filter = LiveQuery {
            conversation_id: Some("c2".into()),
            channel_id: None,
        };
        tx.send(update("c1")).unwrap();
        tx.send(update("c2")).unwrap();
        drop(tx);
        let got: Vec<LiveUpdate> = live_stream(rx, filter).collect().await;
        assert_eq!(got, vec![update("c2")]);
    }
}
