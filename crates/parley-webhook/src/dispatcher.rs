// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain-event fanout to webhook subscribers.
//!
//! Delivery is at-least-once: each matching subscription gets up to
//! `max_attempts` POSTs with backoff between them. The final outcome of every
//! (event, subscription) pair is written to the execution log. Failures never
//! reach the producer of the event.

use std::sync::Arc;
use std::time::Duration;

use parley_bus::EventBus;
use parley_config::model::WebhookConfig;
use parley_core::types::{WebhookExecution, WebhookSubscription, timestamp_now};
use parley_core::{DomainEvent, EventType, ParleyError};
use parley_resilience::BackoffPolicy;
use parley_storage::Database;
use parley_storage::queries::webhooks;
use serde_json::json;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::signing::{self, EVENT_HEADER, EVENT_ID_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};

/// Result of one HTTP attempt.
struct AttemptResult {
    status: Option<u16>,
    error: Option<String>,
}

impl AttemptResult {
    fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    db: Database,
    client: reqwest::Client,
    policy: BackoffPolicy,
    timeout: Duration,
    limiter: Arc<Semaphore>,
}

impl WebhookDispatcher {
    pub fn new(db: Database, config: &WebhookConfig) -> Result<Self, ParleyError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("parley-webhook/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ParleyError::Webhook {
                message: "failed to build HTTP client".into(),
                source: Some(Box::new(e)),
            })?;
        Ok(Self {
            db,
            client,
            policy: BackoffPolicy::from_webhook(config),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
            limiter: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
        })
    }

    /// Replace the retry schedule.
    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Deliver `event` to every matching active subscription and wait for
    /// all of them to settle.
    pub async fn fan_out(&self, event: &DomainEvent) -> Vec<WebhookExecution> {
        let subscriptions = match webhooks::list_subscriptions(&self.db, true).await {
            Ok(subs) => subs,
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "failed to load webhook subscriptions");
                return Vec::new();
            }
        };
        let matching: Vec<_> = subscriptions
            .into_iter()
            .filter(|s| s.matches(event.event, event.channel_id.as_deref()))
            .collect();
        if matching.is_empty() {
            return Vec::new();
        }
        debug!(event_id = %event.id, event_type = %event.event, subscribers = matching.len(), "fanning out event");
        futures::future::join_all(matching.iter().map(|sub| self.deliver(sub, event))).await
    }

    /// Send a synthetic event of `event_type` to one subscription, even when inactive.
    pub async fn send_test(
        &self,
        subscription_id: &str,
        event_type: EventType,
    ) -> Result<WebhookExecution, ParleyError> {
        let sub = webhooks::get_subscription(&self.db, subscription_id)
            .await?
            .ok_or_else(|| ParleyError::not_found("webhook", subscription_id))?;
        let event = DomainEvent::new(
            event_type,
            sub.channel_id.clone(),
            json!({ "test": true, "subscriptionId": sub.id }),
        );
        Ok(self.deliver(&sub, &event).await)
    }

    /// Deliver one event to one subscription with retries and log the outcome.
    pub async fn deliver(&self, sub: &WebhookSubscription, event: &DomainEvent) -> WebhookExecution {
        let mut attempts: u32 = 0;
        let last = match serde_json::to_vec(event) {
            Ok(body) => loop {
                attempts += 1;
                let result = self.attempt(sub, event, &body).await;
                if result.succeeded() || !self.policy.allows_retry(attempts) {
                    break result;
                }
                let delay = self.policy.delay(attempts);
                debug!(
                    subscription_id = %sub.id,
                    event_id = %event.id,
                    attempt = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = result.error.as_deref().unwrap_or_default(),
                    "webhook delivery failed, retrying"
                );
                tokio::time::sleep(delay).await;
            },
            Err(e) => AttemptResult {
                status: None,
                error: Some(format!("failed to serialize event: {e}")),
            },
        };

        let execution = WebhookExecution {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: sub.id.clone(),
            event_id: event.id.clone(),
            event_type: event.event.to_string(),
            success: last.succeeded(),
            attempts: i64::from(attempts),
            response_status: last.status.map(i64::from),
            error: last.error,
            created_at: timestamp_now(),
        };
        if execution.success {
            info!(subscription_id = %sub.id, event_id = %event.id, attempts, "webhook delivered");
        } else {
            warn!(
                subscription_id = %sub.id,
                event_id = %event.id,
                attempts,
                error = execution.error.as_deref().unwrap_or_default(),
                "webhook delivery gave up"
            );
        }
        crate::record_delivery(if execution.success { "success" } else { "failure" });
        if let Err(e) = webhooks::insert_execution(&self.db, &execution).await {
            warn!(subscription_id = %sub.id, error = %e, "failed to record webhook execution");
        }
        execution
    }

    async fn attempt(&self, sub: &WebhookSubscription, event: &DomainEvent, body: &[u8]) -> AttemptResult {
        let Ok(_permit) = self.limiter.acquire().await else {
            return AttemptResult {
                status: None,
                error: Some("dispatcher shut down".into()),
            };
        };

        let mut request = self
            .client
            .post(&sub.url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(EVENT_HEADER, event.event.to_string())
            .header(EVENT_ID_HEADER, &event.id)
            .header(TIMESTAMP_HEADER, chrono::Utc::now().timestamp().to_string());
        if let Some(secret) = &sub.secret {
            match signing::sign(secret, body) {
                Ok(signature) => request = request.header(SIGNATURE_HEADER, signature),
                Err(e) => {
                    return AttemptResult {
                        status: None,
                        error: Some(e.to_string()),
                    };
                }
            }
        }

        match request.body(body.to_vec()).send().await {
            Ok(response) if response.status().is_success() => AttemptResult {
                status: Some(response.status().as_u16()),
                error: None,
            },
            Ok(response) => AttemptResult {
                status: Some(response.status().as_u16()),
                error: Some(format!("subscriber responded {}", response.status())),
            },
            Err(e) if e.is_timeout() => AttemptResult {
                status: None,
                error: Some(format!("timed out after {:?}", self.timeout)),
            },
            Err(e) => AttemptResult {
                status: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Consume domain events until `cancel` fires or the bus closes.
    ///
    /// Each event is fanned out on its own task so a slow subscriber never
    /// delays the next event.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<DomainEvent>, cancel: CancellationToken) {
        info!("webhook dispatcher started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = events.recv() => match next {
                    Some(event) => {
                        let dispatcher = self.clone();
                        tokio::spawn(async move {
                            dispatcher.fan_out(&event).await;
                        });
                    }
                    None => break,
                },
            }
        }
        info!("webhook dispatcher stopped");
    }

    /// Subscribe to `bus` and run in the background.
    pub async fn spawn(self, bus: &EventBus, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let events = bus.subscribe_domain().await;
        tokio::spawn(self.run(events, cancel))
    }
}
