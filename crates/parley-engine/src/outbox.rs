// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Background delivery of outbox jobs.

use std::sync::Arc;
use std::time::Duration;

use parley_core::ParleyError;
use parley_storage::queries::outbox;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{AttemptMode, MessagePipeline};

/// Jobs claimed per poll.
const BATCH_SIZE: i64 = 32;

/// Claims due outbox jobs and performs one attempt for each.
pub struct OutboxWorker {
    pipeline: MessagePipeline,
    wake: Arc<Notify>,
    poll_interval: Duration,
    lock_secs: u64,
}

impl OutboxWorker {
    pub fn new(pipeline: MessagePipeline, poll_interval: Duration, lock_timeout: Duration) -> Self {
        let wake = pipeline.wake_handle();
        Self {
            pipeline,
            wake,
            poll_interval,
            lock_secs: lock_timeout.as_secs().max(1),
        }
    }

    /// Claim and attempt one batch. Returns how many jobs were processed.
    pub async fn run_once(&self) -> Result<usize, ParleyError> {
        let entries =
            outbox::claim_due(self.pipeline.database(), BATCH_SIZE, self.lock_secs).await?;
        if entries.is_empty() {
            return Ok(0);
        }
        debug!(count = entries.len(), "claimed outbox jobs");

        let attempts = entries.iter().map(|entry| async move {
            if let Err(e) = self
                .pipeline
                .attempt(&entry.message_id, AttemptMode::Background)
                .await
            {
                warn!(message_id = %entry.message_id, error = %e, "outbox attempt failed");
            }
        });
        futures::future::join_all(attempts).await;
        Ok(entries.len())
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        info!(poll_ms = self.poll_interval.as_millis() as u64, "outbox worker started");
        loop {
            let processed = match self.run_once().await {
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "outbox poll failed");
                    0
                }
            };
            if cancel.is_cancelled() {
                break;
            }
            if processed > 0 {
                continue;
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        info!("outbox worker stopped");
    }
}
