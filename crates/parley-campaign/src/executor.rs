// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign lifecycle and bulk execution.
//!
//! Every recipient goes through the same message pipeline as interactive
//! chat. A bounded pool per channel limits concurrent sends, and a single
//! recipient's failure is recorded on its row without stopping the batch.
//! A run cut short by shutdown leaves the campaign SENDING; the next process
//! resumes it with the recipients that never got a message.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parley_config::model::CampaignConfig;
use parley_core::ParleyError;
use parley_core::types::{
    Campaign, CampaignCounts, CampaignRecipient, CampaignStatus, MessageStatus, timestamp_now,
};
use parley_engine::Engine;
use parley_storage::Database;
use parley_storage::queries::{campaigns, contacts};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::template;

/// Request body for creating a campaign.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCampaign {
    pub name: String,
    pub channel_id: String,
    pub template: String,
}

/// A campaign with its derived counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignReport {
    #[serde(flatten)]
    pub campaign: Campaign,
    #[serde(flatten)]
    pub counts: CampaignCounts,
}

/// Result of one execution run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub campaign_id: String,
    pub status: CampaignStatus,
    /// Recipients handed to the pipeline in this run.
    pub dispatched: usize,
    /// Recipients failed before a message could be created.
    pub skipped: usize,
    pub counts: CampaignCounts,
}

enum RecipientOutcome {
    Dispatched(MessageStatus),
    Skipped,
}

#[derive(Clone)]
pub struct CampaignExecutor {
    engine: Engine,
    config: CampaignConfig,
    running: Arc<DashMap<String, CancellationToken>>,
    /// Parent of every run token; fired on process shutdown.
    stopping: CancellationToken,
    tracker: TaskTracker,
}

impl CampaignExecutor {
    pub fn new(engine: Engine, config: CampaignConfig) -> Self {
        Self {
            engine,
            config,
            running: Arc::new(DashMap::new()),
            stopping: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub(crate) fn db(&self) -> &Database {
        self.engine.database()
    }

    async fn load(&self, id: &str) -> Result<Campaign, ParleyError> {
        campaigns::get_campaign(self.db(), id)
            .await?
            .ok_or_else(|| ParleyError::not_found("campaign", id))
    }

    fn invalid(campaign: &Campaign, operation: &'static str) -> ParleyError {
        ParleyError::InvalidState {
            entity: "campaign",
            id: campaign.id.clone(),
            state: campaign.status.to_string(),
            operation,
        }
    }

    /// Create a DRAFT campaign.
    pub async fn create(
        &self,
        request: NewCampaign,
        created_by: Option<&str>,
    ) -> Result<Campaign, ParleyError> {
        if request.name.trim().is_empty() {
            return Err(ParleyError::validation("campaign name is required"));
        }
        if request.template.trim().is_empty() {
            return Err(ParleyError::validation("campaign template is required"));
        }
        if !self.engine.registry().contains(&request.channel_id) {
            return Err(ParleyError::validation(format!(
                "unknown channel: {}",
                request.channel_id
            )));
        }
        let now = timestamp_now();
        let campaign = Campaign {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            channel_id: request.channel_id,
            template: request.template,
            status: CampaignStatus::Draft,
            scheduled_for: None,
            created_by: created_by.map(str::to_string),
            started_at: None,
            completed_at: None,
            created_at: now.clone(),
            updated_at: now,
        };
        campaigns::insert_campaign(self.db(), &campaign).await?;
        info!(campaign_id = %campaign.id, channel_id = %campaign.channel_id, "campaign created");
        Ok(campaign)
    }

    pub async fn get(&self, id: &str) -> Result<CampaignReport, ParleyError> {
        let campaign = self.load(id).await?;
        let counts = campaigns::campaign_counts(self.db(), id).await?;
        Ok(CampaignReport { campaign, counts })
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Campaign>, ParleyError> {
        campaigns::list_campaigns(self.db(), limit.clamp(1, 200), offset.max(0)).await
    }

    pub async fn recipients(&self, id: &str) -> Result<Vec<CampaignRecipient>, ParleyError> {
        self.load(id).await?;
        campaigns::list_recipients(self.db(), id).await
    }

    /// Attach contacts. Contacts already on the campaign are skipped.
    ///
    /// Returns how many recipients were added. Every contact must exist on
    /// the campaign's channel; nothing is written otherwise.
    pub async fn add_recipients(
        &self,
        id: &str,
        contact_ids: &[String],
    ) -> Result<usize, ParleyError> {
        let campaign = self.load(id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Draft | CampaignStatus::Scheduled
        ) {
            return Err(Self::invalid(&campaign, "add recipients to"));
        }
        if contact_ids.is_empty() {
            return Err(ParleyError::validation("contactIds must not be empty"));
        }
        for contact_id in contact_ids {
            match contacts::get_contact(self.db(), contact_id).await? {
                Some(c) if c.channel_id == campaign.channel_id => {}
                Some(_) => {
                    return Err(ParleyError::validation(format!(
                        "contact {contact_id} is not on channel {}",
                        campaign.channel_id
                    )));
                }
                None => {
                    return Err(ParleyError::validation(format!(
                        "unknown contact: {contact_id}"
                    )));
                }
            }
        }
        let added = campaigns::add_recipients(self.db(), id, contact_ids).await?;
        info!(campaign_id = %id, added, requested = contact_ids.len(), "recipients added");
        Ok(added)
    }

    /// DRAFT -> SCHEDULED.
    pub async fn schedule(&self, id: &str, scheduled_for: &str) -> Result<Campaign, ParleyError> {
        let at = normalize_time(scheduled_for)?;
        let campaign = self.load(id).await?;
        self.require_recipients(&campaign, "schedule").await?;
        let scheduled = campaigns::transition(
            self.db(),
            id,
            &[CampaignStatus::Draft],
            CampaignStatus::Scheduled,
            Some(&at),
        )
        .await?
        .ok_or_else(|| Self::invalid(&campaign, "schedule"))?;
        info!(campaign_id = %id, scheduled_for = %at, "campaign scheduled");
        Ok(scheduled)
    }

    /// Stop dispatching new recipients. In-flight sends finish.
    pub async fn cancel(&self, id: &str) -> Result<Campaign, ParleyError> {
        let campaign = self.load(id).await?;
        let cancelled = campaigns::transition(
            self.db(),
            id,
            &[
                CampaignStatus::Draft,
                CampaignStatus::Scheduled,
                CampaignStatus::Sending,
            ],
            CampaignStatus::Cancelled,
            None,
        )
        .await?
        .ok_or_else(|| Self::invalid(&campaign, "cancel"))?;
        if let Some(token) = self.running.get(id) {
            token.cancel();
        }
        info!(campaign_id = %id, previous = %campaign.status, "campaign cancelled");
        Ok(cancelled)
    }

    /// Run a DRAFT campaign to completion.
    pub async fn execute(&self, id: &str) -> Result<ExecutionSummary, ParleyError> {
        let (campaign, token) = self.begin(id, CampaignStatus::Draft).await?;
        Ok(self.run(campaign, token).await)
    }

    /// Move a DRAFT campaign to SENDING and execute it in the background.
    pub async fn start(&self, id: &str) -> Result<Campaign, ParleyError> {
        let (campaign, token) = self.begin(id, CampaignStatus::Draft).await?;
        self.spawn_run(campaign.clone(), token);
        Ok(campaign)
    }

    /// Move a due SCHEDULED campaign to SENDING and execute it in the background.
    pub(crate) async fn start_scheduled(&self, id: &str) -> Result<Campaign, ParleyError> {
        let (campaign, token) = self.begin(id, CampaignStatus::Scheduled).await?;
        self.spawn_run(campaign.clone(), token);
        Ok(campaign)
    }

    fn spawn_run(&self, campaign: Campaign, token: CancellationToken) {
        let executor = self.clone();
        self.tracker.spawn(async move {
            executor.run(campaign, token).await;
        });
    }

    /// Restart SENDING campaigns that no run in this process owns.
    ///
    /// Covers runs cut short by a restart or a storage fault. Only recipients
    /// without a message are dispatched, so a resumed run never sends twice.
    pub async fn resume_interrupted(&self) -> Result<usize, ParleyError> {
        if self.stopping.is_cancelled() {
            return Ok(0);
        }
        let mut resumed = 0;
        for campaign in campaigns::sending_campaigns(self.db()).await? {
            let token = self.stopping.child_token();
            match self.running.entry(campaign.id.clone()) {
                Entry::Occupied(_) => continue,
                Entry::Vacant(slot) => {
                    slot.insert(token.clone());
                }
            }
            // A cancel that missed the token above has already left SENDING.
            match campaigns::get_campaign(self.db(), &campaign.id).await {
                Ok(Some(current)) if current.status == CampaignStatus::Sending => {
                    info!(campaign_id = %campaign.id, "resuming interrupted campaign");
                    self.spawn_run(current, token);
                    resumed += 1;
                }
                Ok(_) => {
                    self.running.remove(&campaign.id);
                }
                Err(e) => {
                    self.running.remove(&campaign.id);
                    return Err(e);
                }
            }
        }
        Ok(resumed)
    }

    /// Stop dispatching and wait up to `timeout` for background runs.
    ///
    /// Interrupted campaigns stay SENDING and resume on the next start.
    /// Returns `false` when runs were still busy at the deadline.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.stopping.cancel();
        self.tracker.close();
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                in_flight = self.tracker.len(),
                "campaign runs still busy at shutdown deadline"
            );
            return false;
        }
        true
    }

    async fn require_recipients(
        &self,
        campaign: &Campaign,
        operation: &'static str,
    ) -> Result<(), ParleyError> {
        let counts = campaigns::campaign_counts(self.db(), &campaign.id).await?;
        if counts.total_recipients == 0 {
            return Err(ParleyError::InvalidState {
                entity: "campaign",
                id: campaign.id.clone(),
                state: format!("{} without recipients", campaign.status),
                operation,
            });
        }
        Ok(())
    }

    async fn begin(
        &self,
        id: &str,
        from: CampaignStatus,
    ) -> Result<(Campaign, CancellationToken), ParleyError> {
        let campaign = self.load(id).await?;
        if campaign.status != from {
            return Err(Self::invalid(&campaign, "execute"));
        }
        self.require_recipients(&campaign, "execute").await?;

        // Registered before the transition so a cancel racing the start is seen.
        let token = self.stopping.child_token();
        self.running.insert(id.to_string(), token.clone());
        match campaigns::transition(self.db(), id, &[from], CampaignStatus::Sending, None).await {
            Ok(Some(sending)) => {
                info!(campaign_id = %id, "campaign sending");
                Ok((sending, token))
            }
            Ok(None) => {
                self.running.remove(id);
                Err(Self::invalid(&campaign, "execute"))
            }
            Err(e) => {
                self.running.remove(id);
                Err(e)
            }
        }
    }

    async fn run(&self, campaign: Campaign, token: CancellationToken) -> ExecutionSummary {
        let workers = self.config.workers_for(&campaign.channel_id).max(1);
        let pool = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        let recipients = match campaigns::unsent_recipients(self.db(), &campaign.id).await {
            Ok(r) => r,
            Err(e) => {
                // Left SENDING; the scheduler resumes it once storage recovers.
                error!(campaign_id = %campaign.id, error = %e, "failed to load recipients");
                self.running.remove(&campaign.id);
                return self.summary(campaign, CampaignStatus::Sending, 0, 0).await;
            }
        };
        debug!(campaign_id = %campaign.id, recipients = recipients.len(), workers, "campaign run started");

        let mut stopped_early = false;
        for recipient in recipients {
            let permit = tokio::select! {
                _ = token.cancelled() => {
                    stopped_early = true;
                    break;
                }
                permit = pool.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => {
                        stopped_early = true;
                        break;
                    }
                },
            };
            if token.is_cancelled() {
                stopped_early = true;
                break;
            }
            let executor = self.clone();
            let campaign = campaign.clone();
            tasks.spawn(async move {
                let _permit = permit;
                executor.send_to(&campaign, recipient).await
            });
        }

        let mut dispatched = 0;
        let mut skipped = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(RecipientOutcome::Dispatched(status)) => {
                    dispatched += 1;
                    crate::record_recipient(&campaign.channel_id, status);
                }
                Ok(RecipientOutcome::Skipped) => {
                    skipped += 1;
                    crate::record_recipient(&campaign.channel_id, MessageStatus::Failed);
                }
                Err(e) => warn!(campaign_id = %campaign.id, error = %e, "recipient task panicked"),
            }
        }

        let status = if stopped_early && self.stopping.is_cancelled() {
            warn!(campaign_id = %campaign.id, "campaign run interrupted by shutdown");
            CampaignStatus::Sending
        } else {
            self.finish(&campaign).await
        };
        self.running.remove(&campaign.id);
        self.summary(campaign, status, dispatched, skipped).await
    }

    async fn summary(
        &self,
        campaign: Campaign,
        status: CampaignStatus,
        dispatched: usize,
        skipped: usize,
    ) -> ExecutionSummary {
        let counts = campaigns::campaign_counts(self.db(), &campaign.id)
            .await
            .unwrap_or_default();
        info!(
            campaign_id = %campaign.id,
            %status,
            dispatched,
            skipped,
            sent = counts.sent_count,
            failed = counts.failed_count,
            total = counts.total_recipients,
            "campaign run finished"
        );
        ExecutionSummary {
            campaign_id: campaign.id,
            status,
            dispatched,
            skipped,
            counts,
        }
    }

    async fn finish(&self, campaign: &Campaign) -> CampaignStatus {
        match campaigns::transition(
            self.db(),
            &campaign.id,
            &[CampaignStatus::Sending],
            CampaignStatus::Completed,
            None,
        )
        .await
        {
            Ok(Some(done)) => done.status,
            Ok(None) => match campaigns::get_campaign(self.db(), &campaign.id).await {
                Ok(Some(current)) => current.status,
                _ => CampaignStatus::Cancelled,
            },
            Err(e) => {
                warn!(campaign_id = %campaign.id, error = %e, "failed to complete campaign");
                CampaignStatus::Sending
            }
        }
    }

    async fn send_to(&self, campaign: &Campaign, recipient: CampaignRecipient) -> RecipientOutcome {
        match self.dispatch(campaign, &recipient).await {
            Ok(status) => RecipientOutcome::Dispatched(status),
            Err(e) => {
                warn!(
                    campaign_id = %campaign.id,
                    recipient_id = %recipient.id,
                    contact_id = %recipient.contact_id,
                    error = %e,
                    "campaign recipient failed"
                );
                if let Err(e) =
                    campaigns::fail_recipient(self.db(), &recipient.id, &e.to_string()).await
                {
                    warn!(recipient_id = %recipient.id, error = %e, "failed to record recipient failure");
                }
                RecipientOutcome::Skipped
            }
        }
    }

    async fn dispatch(
        &self,
        campaign: &Campaign,
        recipient: &CampaignRecipient,
    ) -> Result<MessageStatus, ParleyError> {
        let contact = self.engine.identity.get(&recipient.contact_id).await?;
        let body = template::render(&campaign.template, &contact);
        let conversation = self.engine.conversations.open_or_get(&contact).await?;
        let message = self
            .engine
            .pipeline
            .enqueue_campaign_message(&conversation, &campaign.id, &recipient.id, body)
            .await?;
        let settled = self.engine.pipeline.drive(&message.id).await?;
        Ok(settled.status)
    }
}

/// Parse an RFC 3339 time into the storage timestamp format.
fn normalize_time(value: &str) -> Result<String, ParleyError> {
    let parsed = chrono::DateTime::parse_from_rfc3339(value)
        .map_err(|e| ParleyError::validation(format!("invalid scheduledFor {value}: {e}")))?;
    Ok(parsed
        .with_timezone(&chrono::Utc)
        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
        .to_string())
}
