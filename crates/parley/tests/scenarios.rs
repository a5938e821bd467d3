// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end delivery scenarios against the wired engine.

use std::time::Duration;

use parley_campaign::NewCampaign;
use parley_core::types::{CampaignStatus, MessageStatus};
use parley_core::{ChannelError, LiveUpdate, ParleyError};
use parley_resilience::ChannelHealth;
use parley_storage::queries::{contacts, messages};
use parley_test_utils::{MOCK_CHANNEL_ID, TestHarness};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const PHONE_JID: &str = "5511999990000@s.whatsapp.net";

async fn contact_count(harness: &TestHarness) -> i64 {
    contacts::count_contacts(harness.database(), MOCK_CHANNEL_ID)
        .await
        .unwrap()
}

#[tokio::test]
async fn scenario_a_first_inbound_creates_one_phone_contact() {
    let harness = TestHarness::builder().build().await.unwrap();

    let summary = harness
        .receive_text(PHONE_JID, "WA-A1", "hello")
        .await
        .unwrap();
    assert_eq!(summary.received, 1);

    assert_eq!(contact_count(&harness).await, 1);
    let contact = contacts::get_contact_by_identifier(harness.database(), MOCK_CHANNEL_ID, PHONE_JID)
        .await
        .unwrap()
        .expect("contact keyed by phone");
    assert_eq!(contact.phone.as_deref(), Some("5511999990000"));

    let conversation = harness.conversation("5511999990000").await.unwrap();
    assert_eq!(conversation.contact_id, contact.id);
    assert_eq!(conversation.unread_count, 1);
    assert!(conversation.last_message_at.is_some());
}

#[tokio::test]
async fn scenario_b_lid_is_upgraded_when_phone_appears() {
    let harness = TestHarness::builder().build().await.unwrap();

    harness
        .inbound(json!({ "messages": [{ "from": "AB12CD@lid", "id": "WA-B1", "text": "first" }] }))
        .await
        .unwrap();
    assert_eq!(contact_count(&harness).await, 1);

    harness
        .inbound(json!({ "messages": [
            { "from": "AB12CD@lid", "id": "WA-B2", "text": "second", "phone": "5511999990000" }
        ]}))
        .await
        .unwrap();

    assert_eq!(contact_count(&harness).await, 1);
    let contact = harness.contact("5511999990000").await.unwrap();
    assert_eq!(contact.channel_identifier, PHONE_JID);
    assert_eq!(contact.phone.as_deref(), Some("5511999990000"));
    assert!(!contact.is_lid());

    let conversation = harness.conversation("5511999990000").await.unwrap();
    let thread = harness
        .engine
        .conversations
        .messages(&conversation.id, 50, 0)
        .await
        .unwrap();
    assert_eq!(thread.len(), 2);
}

#[tokio::test]
async fn scenario_c_auth_error_fails_without_retry() {
    let harness = TestHarness::builder()
        .with_max_attempts(5)
        .build()
        .await
        .unwrap();
    harness
        .mock_channel
        .push_err(ChannelError::Auth("token expired".into()));
    let conversation = harness.conversation("5511999990001").await.unwrap();

    let message = harness.send_text(&conversation.id, "hi").await.unwrap();

    assert_eq!(message.status, MessageStatus::Failed);
    assert_eq!(message.retry_count, 0);
    assert_eq!(harness.mock_channel.call_count(), 1);
    assert!(matches!(
        harness.engine.channel_health().health(MOCK_CHANNEL_ID),
        ChannelHealth::Degraded { .. }
    ));

    // The channel stays degraded: the next send fails without reaching the adapter.
    let second = harness.send_text(&conversation.id, "again").await.unwrap();
    assert_eq!(second.status, MessageStatus::Failed);
    assert_eq!(harness.mock_channel.call_count(), 1);

    assert!(harness.engine.reset_channel(MOCK_CHANNEL_ID).unwrap());
    let third = harness.send_text(&conversation.id, "after reset").await.unwrap();
    assert_eq!(third.status, MessageStatus::Sent);
}

#[tokio::test]
async fn scenario_d_permanent_failure_is_isolated_to_one_recipient() {
    let harness = TestHarness::builder().build().await.unwrap();
    let phones = ["5511900000001", "5511900000002", "5511900000003"];
    harness.mock_channel.fail_recipient(
        "5511900000002@s.whatsapp.net",
        ChannelError::PermanentRejection("number not registered".into()),
    );

    let campaign = harness
        .campaigns
        .create(
            NewCampaign {
                name: "scenario-d".into(),
                channel_id: MOCK_CHANNEL_ID.into(),
                template: "Hello {{name}}".into(),
            },
            Some("agent-1"),
        )
        .await
        .unwrap();
    let mut ids = Vec::new();
    for phone in phones {
        ids.push(harness.contact(phone).await.unwrap().id);
    }
    harness
        .campaigns
        .add_recipients(&campaign.id, &ids)
        .await
        .unwrap();

    let summary = harness.campaigns.execute(&campaign.id).await.unwrap();
    assert_eq!(summary.status, CampaignStatus::Completed);

    let report = harness.campaigns.get(&campaign.id).await.unwrap();
    assert_eq!(report.campaign.status, CampaignStatus::Completed);
    assert_eq!(report.counts.total_recipients, 3);
    assert_eq!(report.counts.sent_count, 2);
    assert_eq!(report.counts.failed_count, 1);
    assert_eq!(harness.mock_channel.call_count(), 3);

    assert!(matches!(
        harness.campaigns.execute(&campaign.id).await,
        Err(ParleyError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn scenario_e_late_lower_receipt_does_not_regress() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.mock_channel.push_ok("WA-E1");
    let conversation = harness.conversation("5511999990002").await.unwrap();
    let sent = harness.send_text(&conversation.id, "hi").await.unwrap();
    assert_eq!(sent.status, MessageStatus::Sent);

    harness.receipt("WA-E1", MessageStatus::Read).await.unwrap();
    harness.receipt("WA-E1", MessageStatus::Delivered).await.unwrap();
    harness.receipt("WA-E1", MessageStatus::Read).await.unwrap();

    let stored = messages::get_message(harness.database(), &sent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, MessageStatus::Read);
}

#[tokio::test]
async fn repeated_receipt_is_a_no_op() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.mock_channel.push_ok("WA-F1");
    let conversation = harness.conversation("5511999990004").await.unwrap();
    let sent = harness.send_text(&conversation.id, "hi").await.unwrap();
    let mut live = harness.bus.subscribe_live();
    let mut domain = harness.bus.subscribe_domain().await;

    harness.receipt("WA-F1", MessageStatus::Delivered).await.unwrap();
    let first = messages::get_message(harness.database(), &sent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.status, MessageStatus::Delivered);
    assert!(matches!(
        live.try_recv().unwrap(),
        LiveUpdate::MessageStatus { status: MessageStatus::Delivered, .. }
    ));

    let summary = harness.receipt("WA-F1", MessageStatus::Delivered).await.unwrap();
    assert_eq!(summary.receipts, 1);
    let second = messages::get_message(harness.database(), &sent.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second, first);
    assert!(live.try_recv().is_err());
    assert!(domain.try_recv().is_err());
}

#[tokio::test]
async fn outbox_worker_delivers_accepted_sends() {
    let harness = TestHarness::builder().build().await.unwrap();
    let conversation = harness.conversation("5511999990003").await.unwrap();
    let accepted = harness
        .engine
        .pipeline
        .submit(
            parley_engine::SendRequest {
                conversation_id: conversation.id.clone(),
                content: Some("queued".into()),
                ..Default::default()
            },
            Some("agent-1"),
        )
        .await
        .unwrap();
    assert_eq!(accepted.status, MessageStatus::Pending);

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(harness.engine.outbox_worker().run(cancel.clone()));

    let mut status = MessageStatus::Pending;
    for _ in 0..200 {
        status = harness.engine.pipeline.get(&accepted.id).await.unwrap().status;
        if status != MessageStatus::Pending {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    worker.await.unwrap();

    assert_eq!(status, MessageStatus::Sent);
    assert_eq!(harness.mock_channel.call_count(), 1);
}
