// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook fanout for Parley domain events.
//!
//! Subscriptions select from a fixed event set and may be scoped to one
//! channel. Payloads are signed with HMAC-SHA256 when the subscription has a
//! secret, and every delivery outcome is kept in an execution log.

pub mod dispatcher;
pub mod signing;
pub mod subscriptions;

pub use dispatcher::WebhookDispatcher;
pub use subscriptions::{NewSubscription, SubscriptionPatch, Subscriptions, parse_events};

pub(crate) fn record_delivery(outcome: &'static str) {
    metrics::counter!("parley_webhook_deliveries_total", "outcome" => outcome).increment(1);
}
