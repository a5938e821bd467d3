// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-message mutual exclusion for adapter calls.
//!
//! At most one send attempt per message id is in flight. Entries are removed
//! once the last holder or waiter lets go, so the map only grows with
//! concurrent work.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of per-message locks.
#[derive(Debug, Default, Clone)]
pub struct MessageLocks {
    inner: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl MessageLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `message_id`.
    pub async fn acquire(&self, message_id: &str) -> MessageGuard {
        // Cloned under the shard lock so removal in `Drop` sees every waiter.
        let mutex = self
            .inner
            .entry(message_id.to_string())
            .or_default()
            .clone();
        let guard = mutex.lock_owned().await;
        MessageGuard {
            guard: Some(guard),
            locks: self.inner.clone(),
            message_id: message_id.to_string(),
        }
    }

    /// Try to take the lock without waiting.
    pub fn try_acquire(&self, message_id: &str) -> Option<MessageGuard> {
        let mutex = self
            .inner
            .entry(message_id.to_string())
            .or_default()
            .clone();
        match mutex.try_lock_owned() {
            Ok(guard) => Some(MessageGuard {
                guard: Some(guard),
                locks: self.inner.clone(),
                message_id: message_id.to_string(),
            }),
            // The failed attempt consumed our clone; the holder keeps the entry alive.
            Err(_) => None,
        }
    }

    /// Number of messages with a holder or waiter.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Exclusive access to one message until dropped.
#[derive(Debug)]
pub struct MessageGuard {
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    message_id: String,
}

impl Drop for MessageGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.message_id, |_, m| Arc::strong_count(m) == 1);
    }
}
