// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Internal typed event bus.
//!
//! Two lanes with different delivery guarantees:
//! - domain events go to every subscriber over an unbounded mpsc channel,
//!   so the webhook dispatcher never misses one;
//! - live updates go over a broadcast channel where slow UI sessions may lag
//!   and lose updates.
//!
//! Publishing never blocks on, or fails because of, a subscriber.

use parley_core::{DomainEvent, LiveUpdate};
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, trace};

/// Default capacity of the live-update broadcast ring.
pub const DEFAULT_LIVE_CAPACITY: usize = 1024;

/// Process-wide event bus.
pub struct EventBus {
    domain: RwLock<Vec<mpsc::UnboundedSender<DomainEvent>>>,
    live: broadcast::Sender<LiveUpdate>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_LIVE_CAPACITY)
    }
}

impl EventBus {
    pub fn new(live_capacity: usize) -> Self {
        let (live, _) = broadcast::channel(live_capacity.max(1));
        Self {
            domain: RwLock::new(Vec::new()),
            live,
        }
    }

    /// Register a reliable domain-event subscriber.
    pub async fn subscribe_domain(&self) -> mpsc::UnboundedReceiver<DomainEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.domain.write().await.push(tx);
        rx
    }

    /// Register a lossy live-update subscriber.
    pub fn subscribe_live(&self) -> broadcast::Receiver<LiveUpdate> {
        self.live.subscribe()
    }

    /// Publish a domain event to every subscriber, pruning closed ones.
    pub async fn publish(&self, event: DomainEvent) {
        debug!(event_id = %event.id, event_type = %event.event, "publishing domain event");
        let mut closed = false;
        {
            let subscribers = self.domain.read().await;
            for tx in subscribers.iter() {
                if tx.send(event.clone()).is_err() {
                    closed = true;
                }
            }
        }
        if closed {
            self.domain.write().await.retain(|tx| !tx.is_closed());
        }
    }

    /// Push a live update. Having no listeners is not an error.
    pub fn publish_live(&self, update: LiveUpdate) {
        if self.live.send(update).is_err() {
            trace!("no live-update listeners");
        }
    }

    pub async fn domain_subscriber_count(&self) -> usize {
        self.domain.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::EventType;

    fn event() -> DomainEvent {
        DomainEvent::new(
            EventType::MessageReceived,
            Some("wa".into()),
            serde_json::json!({"id": "m1"}),
        )
    }

    #[tokio::test]
    async fn every_domain_subscriber_receives_each_event() {
        let bus = EventBus::default();
        let mut a = bus.subscribe_domain().await;
        let mut b = bus.subscribe_domain().await;

        let ev = event();
        bus.publish(ev.clone()).await;

        assert_eq!(a.recv().await.unwrap().id, ev.id);
        assert_eq!(b.recv().await.unwrap().id, ev.id);
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = EventBus::default();
        let a = bus.subscribe_domain().await;
        let _b = bus.subscribe_domain().await;
        drop(a);

        bus.publish(event()).await;
        assert_eq!(bus.domain_subscriber_count().await, 1);
    }

    #[tokio::test]
    async fn live_updates_without_listeners_are_dropped() {
        let bus = EventBus::new(4);
        bus.publish_live(LiveUpdate::ConversationUpdated {
            conversation_id: "c".into(),
            channel_id: "wa".into(),
        });

        let mut rx = bus.subscribe_live();
        bus.publish_live(LiveUpdate::NewMessage {
            conversation_id: "c".into(),
            channel_id: "wa".into(),
            message_id: "m".into(),
        });
        let got = rx.recv().await.unwrap();
        assert_eq!(got.conversation_id(), "c");
    }
}
