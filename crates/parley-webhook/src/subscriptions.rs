// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Validated subscription management.

use std::str::FromStr;

use parley_core::types::{WebhookExecution, WebhookSubscription, timestamp_now};
use parley_core::{EventType, ParleyError};
use parley_storage::Database;
use parley_storage::queries::webhooks;
use serde::Deserialize;
use strum::IntoEnumIterator;
use tracing::info;

/// Create request. `events` holds wire names such as `message.received`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubscription {
    pub name: String,
    pub url: String,
    pub events: Vec<String>,
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
}

/// Partial update. Absent fields keep their value; `secret: ""` clears it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionPatch {
    pub name: Option<String>,
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub secret: Option<String>,
    pub channel_id: Option<String>,
    pub active: Option<bool>,
}

/// Parse event names against the fixed set.
pub fn parse_events(names: &[String]) -> Result<Vec<EventType>, ParleyError> {
    if names.is_empty() {
        return Err(ParleyError::validation("events must not be empty"));
    }
    let mut events = Vec::with_capacity(names.len());
    for name in names {
        let event = EventType::from_str(name).map_err(|_| {
            let allowed: Vec<String> = EventType::iter().map(|e| e.to_string()).collect();
            ParleyError::validation(format!(
                "unknown event {name}; expected one of {}",
                allowed.join(", ")
            ))
        })?;
        if !events.contains(&event) {
            events.push(event);
        }
    }
    Ok(events)
}

fn validate_url(url: &str) -> Result<(), ParleyError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| ParleyError::validation(format!("invalid url {url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ParleyError::validation(format!(
            "url scheme must be http or https, got {other}"
        ))),
    }
}

fn validate_name(name: &str) -> Result<(), ParleyError> {
    if name.trim().is_empty() {
        return Err(ParleyError::validation("name is required"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Subscriptions {
    db: Database,
}

impl Subscriptions {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn create(&self, request: NewSubscription) -> Result<WebhookSubscription, ParleyError> {
        validate_name(&request.name)?;
        validate_url(&request.url)?;
        let events = parse_events(&request.events)?;
        let now = timestamp_now();
        let sub = WebhookSubscription {
            id: uuid::Uuid::new_v4().to_string(),
            name: request.name,
            url: request.url,
            events,
            secret: request.secret.filter(|s| !s.is_empty()),
            channel_id: request.channel_id,
            active: request.active.unwrap_or(true),
            created_at: now.clone(),
            updated_at: now,
        };
        webhooks::insert_subscription(&self.db, &sub).await?;
        info!(subscription_id = %sub.id, url = %sub.url, events = sub.events.len(), "webhook subscription created");
        Ok(sub)
    }

    pub async fn get(&self, id: &str) -> Result<WebhookSubscription, ParleyError> {
        webhooks::get_subscription(&self.db, id)
            .await?
            .ok_or_else(|| ParleyError::not_found("webhook", id))
    }

    pub async fn list(&self) -> Result<Vec<WebhookSubscription>, ParleyError> {
        webhooks::list_subscriptions(&self.db, false).await
    }

    pub async fn update(
        &self,
        id: &str,
        patch: SubscriptionPatch,
    ) -> Result<WebhookSubscription, ParleyError> {
        let mut sub = self.get(id).await?;
        if let Some(name) = patch.name {
            validate_name(&name)?;
            sub.name = name;
        }
        if let Some(url) = patch.url {
            validate_url(&url)?;
            sub.url = url;
        }
        if let Some(events) = patch.events {
            sub.events = parse_events(&events)?;
        }
        if let Some(secret) = patch.secret {
            sub.secret = (!secret.is_empty()).then_some(secret);
        }
        if let Some(channel_id) = patch.channel_id {
            sub.channel_id = (!channel_id.is_empty()).then_some(channel_id);
        }
        if let Some(active) = patch.active {
            sub.active = active;
        }
        sub.updated_at = timestamp_now();
        if !webhooks::update_subscription(&self.db, &sub).await? {
            return Err(ParleyError::not_found("webhook", id));
        }
        info!(subscription_id = %id, active = sub.active, "webhook subscription updated");
        Ok(sub)
    }

    pub async fn delete(&self, id: &str) -> Result<(), ParleyError> {
        if !webhooks::delete_subscription(&self.db, id).await? {
            return Err(ParleyError::not_found("webhook", id));
        }
        info!(subscription_id = %id, "webhook subscription deleted");
        Ok(())
    }

    /// Newest executions first.
    pub async fn executions(
        &self,
        id: &str,
        limit: i64,
    ) -> Result<Vec<WebhookExecution>, ParleyError> {
        self.get(id).await?;
        webhooks::list_executions(&self.db, id, limit.clamp(1, 200)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn service() -> (Subscriptions, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        (Subscriptions::new(db), dir)
    }

    fn request(events: &[&str]) -> NewSubscription {
        NewSubscription {
            name: "crm".into(),
            url: "https://hooks.example.com/parley".into(),
            events: events.iter().map(|e| e.to_string()).collect(),
            secret: Some("s3cret".into()),
            ..Default::default()
        }
    }

    #[test]
    fn event_names_are_checked_and_deduplicated() {
        let parsed = parse_events(&[
            "message.sent".into(),
            "contact.created".into(),
            "message.sent".into(),
        ])
        .unwrap();
        assert_eq!(parsed, vec![EventType::MessageSent, EventType::ContactCreated]);
        assert!(matches!(
            parse_events(&["message.deleted".into()]),
            Err(ParleyError::Validation(_))
        ));
        assert!(parse_events(&[]).is_err());
    }

    #[tokio::test]
    async fn create_update_delete() {
        let (subs, _dir) = service().await;
        let created = subs.create(request(&["message.received"])).await.unwrap();
        assert!(created.active);

        let updated = subs
            .update(
                &created.id,
                SubscriptionPatch {
                    active: Some(false),
                    secret: Some(String::new()),
                    events: Some(vec!["conversation.assigned".into()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(!updated.active);
        assert!(updated.secret.is_none());
        assert_eq!(updated.events, vec![EventType::ConversationAssigned]);
        assert_eq!(subs.get(&created.id).await.unwrap(), updated);

        subs.delete(&created.id).await.unwrap();
        assert!(matches!(
            subs.delete(&created.id).await,
            Err(ParleyError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_requests_write_nothing() {
        let (subs, _dir) = service().await;
        let mut bad_url = request(&["message.sent"]);
        bad_url.url = "ftp://example.com".into();
        assert!(matches!(subs.create(bad_url).await, Err(ParleyError::Validation(_))));
        assert!(matches!(
            subs.create(request(&["nope"])).await,
            Err(ParleyError::Validation(_))
        ));
        assert!(subs.list().await.unwrap().is_empty());
    }
}
