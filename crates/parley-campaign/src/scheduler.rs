// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Promotes due SCHEDULED campaigns to SENDING and picks up SENDING
//! campaigns whose run did not survive a restart.

use std::time::Duration;

use parley_core::ParleyError;
use parley_storage::queries::campaigns;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::CampaignExecutor;

pub struct CampaignScheduler {
    executor: CampaignExecutor,
    interval: Duration,
}

impl CampaignScheduler {
    pub fn new(executor: CampaignExecutor, interval: Duration) -> Self {
        Self { executor, interval }
    }

    /// Start every due campaign and resume orphaned ones. Returns how many
    /// runs were launched.
    pub async fn tick(&self) -> Result<usize, ParleyError> {
        let due = campaigns::due_scheduled(self.executor.db()).await?;
        let mut started = 0;
        for campaign in due {
            match self.executor.start_scheduled(&campaign.id).await {
                Ok(_) => {
                    info!(campaign_id = %campaign.id, scheduled_for = ?campaign.scheduled_for, "scheduled campaign started");
                    started += 1;
                }
                // Lost a race with cancel or another scheduler.
                Err(ParleyError::InvalidState { state, .. }) => {
                    debug!(campaign_id = %campaign.id, %state, "scheduled campaign skipped");
                }
                Err(e) => warn!(campaign_id = %campaign.id, error = %e, "scheduled campaign failed to start"),
            }
        }
        let resumed = self.executor.resume_interrupted().await?;
        Ok(started + resumed)
    }

    /// Run until `cancel` fires.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        info!(interval_secs = self.interval.as_secs(), "campaign scheduler started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "campaign scheduler tick failed");
                    }
                }
            }
        }
        info!("campaign scheduler stopped");
    }
}
