// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Maps provider identifiers to canonical contacts.
//!
//! A contact is keyed by `(channel_id, channel_identifier)`. The identifier
//! is phone-anchored whenever the phone is known; a LID-keyed contact is
//! upgraded in place once a phone is observed for it, and a LID contact that
//! turns out to duplicate a phone-anchored one is merged into it.

use parley_core::address::{Address, normalize_phone, phone_identifier};
use parley_core::types::{Contact, timestamp_now};
use parley_core::{EventType, ParleyError};
use parley_storage::Database;
use parley_storage::queries::contacts;
use tracing::{debug, info, warn};

use crate::notify::Notifier;

/// Concurrent resolvers racing on the same identifier settle within a few rounds.
const MAX_ROUNDS: usize = 4;

/// Everything an inbound event says about its sender.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sighting<'a> {
    pub raw_identifier: &'a str,
    pub observed_phone: Option<&'a str>,
    pub alt_identifier: Option<&'a str>,
    pub display_name: Option<&'a str>,
}

impl<'a> Sighting<'a> {
    pub fn new(raw_identifier: &'a str) -> Self {
        Self {
            raw_identifier,
            ..Self::default()
        }
    }
}

#[derive(Clone)]
pub struct IdentityResolver {
    db: Database,
    notifier: Notifier,
}

impl IdentityResolver {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Resolve a raw identifier, optionally with a phone seen alongside it.
    pub async fn resolve(
        &self,
        channel_id: &str,
        raw_identifier: &str,
        observed_phone: Option<&str>,
    ) -> Result<Contact, ParleyError> {
        self.resolve_sighting(
            channel_id,
            Sighting {
                observed_phone,
                ..Sighting::new(raw_identifier)
            },
        )
        .await
    }

    /// Resolve a contact for an outbound conversation started by phone number.
    pub async fn resolve_phone(&self, channel_id: &str, phone: &str) -> Result<Contact, ParleyError> {
        let phone = normalize_phone(phone)
            .ok_or_else(|| ParleyError::validation(format!("invalid phone number: {phone}")))?;
        let identifier = phone_identifier(&phone);
        self.resolve(channel_id, &identifier, Some(&phone)).await
    }

    /// Return the canonical contact for a sighting, creating it if needed.
    ///
    /// Resolution order: exact or aliased identifier, the alternate identifier,
    /// then the phone. Exactly one contact exists per identity afterwards.
    pub async fn resolve_sighting(
        &self,
        channel_id: &str,
        sighting: Sighting<'_>,
    ) -> Result<Contact, ParleyError> {
        if sighting.raw_identifier.trim().is_empty() {
            return Err(ParleyError::validation("empty sender identifier"));
        }
        let address = Address::parse(sighting.raw_identifier);
        if let Address::Group(group) = &address {
            return Err(ParleyError::validation(format!(
                "group chats do not resolve to contacts: {group}"
            )));
        }

        let identifier = address.identifier();
        let phone = sighting
            .observed_phone
            .and_then(normalize_phone)
            .or_else(|| address.phone().map(str::to_string));
        let display_name = sighting
            .display_name
            .map(str::trim)
            .filter(|name| !name.is_empty());

        for round in 0..MAX_ROUNDS {
            if let Some(existing) =
                contacts::get_contact_by_identifier(&self.db, channel_id, &identifier).await?
            {
                match self.reconcile(existing, phone.as_deref(), display_name).await? {
                    Some(contact) => return Ok(contact),
                    None => continue,
                }
            }

            if let Some(alt) = sighting.alt_identifier.map(|a| Address::parse(a).identifier())
                && let Some(existing) =
                    contacts::get_contact_by_identifier(&self.db, channel_id, &alt).await?
            {
                debug!(%channel_id, %identifier, %alt, "sender matched by alternate identifier");
                match self.reconcile(existing, phone.as_deref(), display_name).await? {
                    Some(contact) => {
                        self.remember_alias(&contact, &identifier).await?;
                        return Ok(contact);
                    }
                    None => continue,
                }
            }

            if let Some(p) = phone.as_deref()
                && let Some(existing) =
                    contacts::find_contact_by_phone(&self.db, channel_id, p, None).await?
            {
                debug!(%channel_id, %identifier, contact_id = %existing.id, "sender matched by phone");
                match self.reconcile(existing, Some(p), display_name).await? {
                    Some(contact) => {
                        self.remember_alias(&contact, &identifier).await?;
                        return Ok(contact);
                    }
                    None => continue,
                }
            }

            let contact = new_contact(channel_id, identifier.clone(), phone.clone(), display_name);
            if contacts::insert_contact(&self.db, &contact).await? {
                info!(
                    %channel_id,
                    contact_id = %contact.id,
                    identifier = %contact.channel_identifier,
                    "contact created"
                );
                self.notifier
                    .domain(EventType::ContactCreated, channel_id, &contact)
                    .await;
                return Ok(contact);
            }
            debug!(%channel_id, %identifier, round, "contact inserted concurrently, re-fetching");
        }

        Err(ParleyError::Internal(format!(
            "identity resolution for {identifier} on {channel_id} did not settle"
        )))
    }

    /// Fold newly observed facts into `existing`.
    ///
    /// Returns `None` when a concurrent writer claimed the target identifier,
    /// in which case the caller starts over.
    async fn reconcile(
        &self,
        existing: Contact,
        phone: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<Option<Contact>, ParleyError> {
        let mut updated = existing.clone();
        if updated.phone.is_none() {
            updated.phone = phone.map(str::to_string);
        }
        if updated.display_name.is_none() {
            updated.display_name = display_name.map(str::to_string);
        }

        if updated.is_lid()
            && let Some(p) = updated.phone.clone()
        {
            if let Some(anchor) = self.phone_anchor(&updated, &p).await? {
                return self.merge(anchor, updated).await.map(Some);
            }
            updated.channel_identifier = phone_identifier(&p);
        }

        if updated == existing {
            return Ok(Some(existing));
        }
        if !contacts::update_contact(&self.db, &updated).await? {
            return Ok(None);
        }
        if updated.channel_identifier != existing.channel_identifier {
            info!(
                channel_id = %updated.channel_id,
                contact_id = %updated.id,
                from = %existing.channel_identifier,
                to = %updated.channel_identifier,
                "contact upgraded to phone identity"
            );
        }

        let fresh = contacts::get_contact(&self.db, &updated.id)
            .await?
            .unwrap_or(updated);
        self.notifier
            .domain(EventType::ContactUpdated, &fresh.channel_id, &fresh)
            .await;
        Ok(Some(fresh))
    }

    /// Another contact already holding `phone`, by phone field or identifier.
    async fn phone_anchor(&self, lid: &Contact, phone: &str) -> Result<Option<Contact>, ParleyError> {
        if let Some(found) =
            contacts::find_contact_by_phone(&self.db, &lid.channel_id, phone, Some(&lid.id)).await?
        {
            return Ok(Some(found));
        }
        Ok(
            contacts::get_contact_by_identifier(&self.db, &lid.channel_id, &phone_identifier(phone))
                .await?
                .filter(|c| c.id != lid.id),
        )
    }

    /// Merge `absorbed` into `survivor`. The phone-anchored side wins every field it has.
    async fn merge(&self, mut survivor: Contact, absorbed: Contact) -> Result<Contact, ParleyError> {
        let conflict = ParleyError::IdentityConflict {
            channel_id: survivor.channel_id.clone(),
            identifier: absorbed.channel_identifier.clone(),
            message: format!("contact {} duplicates {}", absorbed.id, survivor.id),
        };
        warn!(
            error = %conflict,
            survivor = %survivor.id,
            absorbed = %absorbed.id,
            "merging duplicate contacts"
        );

        survivor.phone = survivor.phone.or(absorbed.phone);
        survivor.display_name = survivor.display_name.or(absorbed.display_name);
        survivor.email = survivor.email.or(absorbed.email);
        survivor.profile_picture = survivor.profile_picture.or(absorbed.profile_picture);
        for (key, value) in absorbed.custom_fields {
            survivor.custom_fields.entry(key).or_insert(value);
        }
        if survivor.is_lid()
            && let Some(p) = survivor.phone.as_deref()
        {
            survivor.channel_identifier = phone_identifier(p);
        }

        contacts::merge_contacts(&self.db, &survivor, &absorbed.id).await?;
        let merged = contacts::get_contact(&self.db, &survivor.id)
            .await?
            .unwrap_or(survivor);
        self.notifier
            .domain(EventType::ContactUpdated, &merged.channel_id, &merged)
            .await;
        Ok(merged)
    }

    /// Keep a LID pointing at the contact it was matched to.
    async fn remember_alias(&self, contact: &Contact, identifier: &str) -> Result<(), ParleyError> {
        if identifier != contact.channel_identifier && Address::parse(identifier).is_lid() {
            contacts::add_alias(&self.db, &contact.channel_id, identifier, &contact.id).await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Contact, ParleyError> {
        contacts::get_contact(&self.db, id)
            .await?
            .ok_or_else(|| ParleyError::not_found("contact", id))
    }
}

fn new_contact(
    channel_id: &str,
    identifier: String,
    phone: Option<String>,
    display_name: Option<&str>,
) -> Contact {
    let now = timestamp_now();
    Contact {
        id: uuid::Uuid::new_v4().to_string(),
        channel_id: channel_id.to_string(),
        channel_identifier: identifier,
        display_name: display_name.map(str::to_string),
        phone,
        email: None,
        profile_picture: None,
        custom_fields: Default::default(),
        created_at: now.clone(),
        updated_at: now,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_bus::EventBus;

    use super::*;

    const PHONE: &str = "5511999990000";
    const PHONE_JID: &str = "5511999990000@s.whatsapp.net";
    const LID: &str = "AB12CD@lid";

    async fn resolver() -> (IdentityResolver, Arc<EventBus>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let bus = Arc::new(EventBus::default());
        (IdentityResolver::new(db, Notifier::new(bus.clone())), bus, dir)
    }

    #[tokio::test]
    async fn phone_sender_is_created_then_reused() {
        let (resolver, bus, _dir) = resolver().await;
        let mut events = bus.subscribe_domain().await;

        let first = resolver.resolve("wa", PHONE_JID, None).await.unwrap();
        assert_eq!(first.channel_identifier, PHONE_JID);
        assert_eq!(first.phone.as_deref(), Some(PHONE));
        assert_eq!(events.recv().await.unwrap().event, EventType::ContactCreated);

        let second = resolver.resolve("wa", PHONE_JID, None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn lid_upgrades_when_phone_is_observed() {
        let (resolver, _bus, _dir) = resolver().await;
        let lid = resolver.resolve("wa", LID, None).await.unwrap();
        assert!(lid.is_lid());
        assert!(lid.phone.is_none());

        let upgraded = resolver.resolve("wa", LID, Some(PHONE)).await.unwrap();
        assert_eq!(upgraded.id, lid.id);
        assert_eq!(upgraded.channel_identifier, PHONE_JID);
        assert_eq!(upgraded.phone.as_deref(), Some(PHONE));

        let again = resolver.resolve("wa", LID, None).await.unwrap();
        assert_eq!(again.id, lid.id);
        let by_phone = resolver.resolve("wa", PHONE_JID, None).await.unwrap();
        assert_eq!(by_phone.id, lid.id);
    }

    #[tokio::test]
    async fn lid_seen_with_phone_joins_existing_phone_contact() {
        let (resolver, _bus, _dir) = resolver().await;
        let anchor = resolver.resolve("wa", PHONE_JID, None).await.unwrap();

        let resolved = resolver.resolve("wa", LID, Some(PHONE)).await.unwrap();
        assert_eq!(resolved.id, anchor.id);
        assert_eq!(
            contacts::count_contacts(&resolver.db, "wa").await.unwrap(),
            1
        );

        let later = resolver.resolve("wa", LID, None).await.unwrap();
        assert_eq!(later.id, anchor.id);
    }

    #[tokio::test]
    async fn duplicate_lid_contact_is_merged_into_phone_contact() {
        let (resolver, _bus, _dir) = resolver().await;
        let lid = resolver.resolve("wa", LID, None).await.unwrap();
        let anchor = resolver.resolve("wa", PHONE_JID, None).await.unwrap();
        assert_ne!(lid.id, anchor.id);

        let mut named = lid.clone();
        named.display_name = Some("Ana".into());
        named
            .custom_fields
            .insert("tier".into(), serde_json::json!("gold"));
        named.phone = Some(PHONE.into());
        assert!(contacts::update_contact(&resolver.db, &named).await.unwrap());

        let merged = resolver.resolve("wa", LID, Some(PHONE)).await.unwrap();
        assert_eq!(merged.id, anchor.id);
        assert_eq!(merged.channel_identifier, PHONE_JID);
        assert_eq!(merged.display_name.as_deref(), Some("Ana"));
        assert_eq!(merged.custom_fields["tier"], "gold");
        assert!(contacts::get_contact(&resolver.db, &lid.id).await.unwrap().is_none());
        assert_eq!(
            contacts::count_contacts(&resolver.db, "wa").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn phone_sighting_with_lid_alt_reuses_lid_contact() {
        let (resolver, _bus, _dir) = resolver().await;
        let lid = resolver.resolve("wa", LID, None).await.unwrap();

        let sighting = Sighting {
            alt_identifier: Some(LID),
            ..Sighting::new(PHONE_JID)
        };
        let resolved = resolver.resolve_sighting("wa", sighting).await.unwrap();
        assert_eq!(resolved.id, lid.id);
        assert_eq!(resolved.channel_identifier, PHONE_JID);
        assert_eq!(
            contacts::count_contacts(&resolver.db, "wa").await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn display_name_fills_only_when_missing() {
        let (resolver, _bus, _dir) = resolver().await;
        let first = resolver
            .resolve_sighting(
                "wa",
                Sighting {
                    display_name: Some("Ana"),
                    ..Sighting::new(PHONE_JID)
                },
            )
            .await
            .unwrap();
        let second = resolver
            .resolve_sighting(
                "wa",
                Sighting {
                    display_name: Some("Someone else"),
                    ..Sighting::new(PHONE_JID)
                },
            )
            .await
            .unwrap();
        assert_eq!(first.display_name.as_deref(), Some("Ana"));
        assert_eq!(second.display_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn groups_and_blank_identifiers_are_rejected() {
        let (resolver, _bus, _dir) = resolver().await;
        assert!(matches!(
            resolver.resolve("wa", "120363@g.us", None).await,
            Err(ParleyError::Validation(_))
        ));
        assert!(matches!(
            resolver.resolve("wa", "  ", None).await,
            Err(ParleyError::Validation(_))
        ));
        assert!(matches!(
            resolver.resolve_phone("wa", "not-a-phone").await,
            Err(ParleyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn channels_are_separate_identity_spaces() {
        let (resolver, _bus, _dir) = resolver().await;
        let a = resolver.resolve_phone("wa-a", "+55 11 99999-0000").await.unwrap();
        let b = resolver.resolve_phone("wa-b", PHONE).await.unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn concurrent_resolution_yields_one_contact() {
        let (resolver, _bus, _dir) = resolver().await;
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let r = resolver.clone();
                tokio::spawn(async move { r.resolve("wa", PHONE_JID, None).await.unwrap() })
            })
            .collect();
        let mut ids = Vec::new();
        for t in tasks {
            ids.push(t.await.unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }
}
