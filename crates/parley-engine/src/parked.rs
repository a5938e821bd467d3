// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Receipts that arrived before their send was recorded.
//!
//! A provider can report delivery before `mark_sent` stores the provider
//! message id. Such receipts wait here, keyed by `(channel, provider id)`,
//! and are replayed once the send lands. Entries expire after a TTL and the
//! map is capped so unknown ids cannot grow it without bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parley_core::types::DeliveryReceipt;

/// How long a receipt waits for its send.
pub const DEFAULT_PARK_TTL: Duration = Duration::from_secs(120);

const MAX_PARKED_MESSAGES: usize = 4096;
const MAX_PER_MESSAGE: usize = 4;

type Key = (String, String);

#[derive(Debug, Clone)]
pub struct ParkedReceipts {
    inner: Arc<DashMap<Key, Vec<(Instant, DeliveryReceipt)>>>,
    ttl: Duration,
}

impl Default for ParkedReceipts {
    fn default() -> Self {
        Self::new(DEFAULT_PARK_TTL)
    }
}

impl ParkedReceipts {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// Hold `receipt` until its send is recorded. Returns `false` when full.
    pub fn park(&self, receipt: &DeliveryReceipt) -> bool {
        let key = (
            receipt.channel_id.clone(),
            receipt.provider_message_id.clone(),
        );
        if self.inner.len() >= MAX_PARKED_MESSAGES && !self.inner.contains_key(&key) {
            self.purge_expired();
            if self.inner.len() >= MAX_PARKED_MESSAGES {
                return false;
            }
        }
        let mut waiting = self.inner.entry(key).or_default();
        if waiting.len() >= MAX_PER_MESSAGE {
            return false;
        }
        waiting.push((Instant::now(), receipt.clone()));
        true
    }

    /// Remove and return the live receipts for one provider message.
    pub fn take(&self, channel_id: &str, provider_message_id: &str) -> Vec<DeliveryReceipt> {
        let key = (channel_id.to_string(), provider_message_id.to_string());
        match self.inner.remove(&key) {
            Some((_, waiting)) => waiting
                .into_iter()
                .filter(|(at, _)| at.elapsed() < self.ttl)
                .map(|(_, receipt)| receipt)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn purge_expired(&self) {
        let ttl = self.ttl;
        self.inner.retain(|_, waiting| {
            waiting.retain(|(at, _)| at.elapsed() < ttl);
            !waiting.is_empty()
        });
    }

    /// Number of provider messages with parked receipts.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use parley_core::types::{MessageStatus, timestamp_now};

    use super::*;

    fn receipt(id: &str, status: MessageStatus) -> DeliveryReceipt {
        DeliveryReceipt {
            channel_id: "wa".into(),
            provider_message_id: id.into(),
            status,
            error: None,
            timestamp: timestamp_now(),
        }
    }

    #[test]
    fn take_drains_in_arrival_order() {
        let parked = ParkedReceipts::default();
        assert!(parked.park(&receipt("wamid.1", MessageStatus::Delivered)));
        assert!(parked.park(&receipt("wamid.1", MessageStatus::Read)));
        assert!(parked.park(&receipt("wamid.2", MessageStatus::Read)));
        assert_eq!(parked.len(), 2);

        let taken = parked.take("wa", "wamid.1");
        assert_eq!(
            taken.iter().map(|r| r.status).collect::<Vec<_>>(),
            vec![MessageStatus::Delivered, MessageStatus::Read]
        );
        assert!(parked.take("wa", "wamid.1").is_empty());
        assert_eq!(parked.len(), 1);
    }

    #[test]
    fn per_message_backlog_is_capped() {
        let parked = ParkedReceipts::default();
        for _ in 0..MAX_PER_MESSAGE {
            assert!(parked.park(&receipt("wamid.1", MessageStatus::Delivered)));
        }
        assert!(!parked.park(&receipt("wamid.1", MessageStatus::Read)));
    }

    #[test]
    fn expired_receipts_are_dropped() {
        let parked = ParkedReceipts::new(Duration::ZERO);
        assert!(parked.park(&receipt("wamid.1", MessageStatus::Read)));
        assert!(parked.take("wa", "wamid.1").is_empty());

        assert!(parked.park(&receipt("wamid.2", MessageStatus::Read)));
        parked.purge_expired();
        assert!(parked.is_empty());
    }
}
