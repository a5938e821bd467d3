// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign execution against the full engine and a mock channel.

use std::time::{Duration, Instant};

use parley_campaign::{CampaignExecutor, CampaignScheduler, NewCampaign};
use parley_core::types::{CampaignStatus, MessageStatus, OutboundPayload};
use parley_core::{ChannelError, ParleyError};
use parley_storage::queries::campaigns;
use parley_test_utils::{MOCK_CHANNEL_ID, MockChannel, TestHarness};
use serde_json::json;

const PHONES: [&str; 3] = ["5511900000001", "5511900000002", "5511900000003"];

async fn draft(harness: &TestHarness, template: &str, phones: &[&str]) -> String {
    let campaign = harness
        .campaigns
        .create(
            NewCampaign {
                name: "launch".into(),
                channel_id: MOCK_CHANNEL_ID.into(),
                template: template.into(),
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
    campaign.id
}

async fn wait_for_status(harness: &TestHarness, id: &str, status: CampaignStatus) {
    for _ in 0..200 {
        if harness.campaigns.get(id).await.unwrap().campaign.status == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("campaign {id} never reached {status}");
}

#[tokio::test]
async fn one_permanent_failure_does_not_abort_the_batch() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.mock_channel.fail_recipient(
        "5511900000002@s.whatsapp.net",
        ChannelError::PermanentRejection("not on whatsapp".into()),
    );
    let id = draft(&harness, "Hello", &PHONES).await;

    let summary = harness.campaigns.execute(&id).await.unwrap();

    assert_eq!(summary.status, CampaignStatus::Completed);
    assert_eq!(summary.dispatched, 3);
    assert_eq!(summary.counts.total_recipients, 3);
    assert_eq!(summary.counts.sent_count, 2);
    assert_eq!(summary.counts.failed_count, 1);

    let report = harness.campaigns.get(&id).await.unwrap();
    assert_eq!(report.counts, summary.counts);
    assert!(report.campaign.completed_at.is_some());
}

#[tokio::test]
async fn executing_twice_is_rejected() {
    let harness = TestHarness::builder().build().await.unwrap();
    let id = draft(&harness, "Hello", &PHONES[..1]).await;
    harness.campaigns.execute(&id).await.unwrap();

    let err = harness.campaigns.execute(&id).await.unwrap_err();
    assert!(matches!(err, ParleyError::InvalidState { .. }), "{err}");
    assert_eq!(harness.mock_channel.call_count(), 1);
}

#[tokio::test]
async fn empty_campaign_cannot_execute() {
    let harness = TestHarness::builder().build().await.unwrap();
    let id = draft(&harness, "Hello", &[]).await;
    assert!(matches!(
        harness.campaigns.execute(&id).await,
        Err(ParleyError::InvalidState { .. })
    ));
    assert!(matches!(
        harness.campaigns.execute("missing").await,
        Err(ParleyError::NotFound { .. })
    ));
}

#[tokio::test]
async fn recipients_are_deduplicated_and_validated() {
    let harness = TestHarness::builder().build().await.unwrap();
    let id = draft(&harness, "Hello", &PHONES[..2]).await;
    let again = vec![harness.contact(PHONES[1]).await.unwrap().id];

    assert_eq!(harness.campaigns.add_recipients(&id, &again).await.unwrap(), 0);
    assert!(matches!(
        harness
            .campaigns
            .add_recipients(&id, &["ghost".to_string()])
            .await,
        Err(ParleyError::Validation(_))
    ));
    assert_eq!(harness.campaigns.recipients(&id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn templates_are_personalized_per_recipient() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness
        .inbound(json!({ "messages": [
            { "from": "5511900000001@s.whatsapp.net", "id": "P1", "text": "hi", "name": "Ana Souza" }
        ]}))
        .await
        .unwrap();
    let id = draft(&harness, "Oi {{first_name}}, {{custom.missing}}ok", &PHONES[..1]).await;

    harness.campaigns.execute(&id).await.unwrap();

    let calls = harness.mock_channel.calls();
    assert_eq!(
        calls[0].payload,
        OutboundPayload::Text {
            body: "Oi Ana, ok".into()
        }
    );
}

#[tokio::test]
async fn receipts_flow_into_derived_counts() {
    let harness = TestHarness::builder().build().await.unwrap();
    harness.mock_channel.push_ok("prov-a");
    let id = draft(&harness, "Hello", &PHONES[..1]).await;
    harness.campaigns.execute(&id).await.unwrap();

    harness.receipt("prov-a", MessageStatus::Read).await.unwrap();

    let counts = harness.campaigns.get(&id).await.unwrap().counts;
    assert_eq!(counts.sent_count, 1);
    assert_eq!(counts.delivered_count, 1);
    assert_eq!(counts.read_count, 1);
}

#[tokio::test]
async fn pool_bounds_concurrency() {
    let harness = TestHarness::builder()
        .with_channel(MockChannel::new(MOCK_CHANNEL_ID).with_delay(Duration::from_millis(50)))
        .with_workers(1)
        .build()
        .await
        .unwrap();
    let id = draft(&harness, "Hello", &PHONES).await;

    let started = Instant::now();
    harness.campaigns.execute(&id).await.unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn cancel_stops_new_dispatches() {
    let harness = TestHarness::builder()
        .with_channel(MockChannel::new(MOCK_CHANNEL_ID).with_delay(Duration::from_millis(100)))
        .with_workers(1)
        .build()
        .await
        .unwrap();
    let id = draft(&harness, "Hello", &PHONES).await;

    let sending = harness.campaigns.start(&id).await.unwrap();
    assert_eq!(sending.status, CampaignStatus::Sending);
    tokio::time::sleep(Duration::from_millis(30)).await;
    let cancelled = harness.campaigns.cancel(&id).await.unwrap();
    assert_eq!(cancelled.status, CampaignStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let report = harness.campaigns.get(&id).await.unwrap();
    assert_eq!(report.campaign.status, CampaignStatus::Cancelled);
    assert_eq!(harness.mock_channel.call_count(), 1);
    assert_eq!(report.counts.sent_count, 1);
    assert_eq!(report.counts.pending_count, 2);

    assert!(matches!(
        harness.campaigns.cancel(&id).await,
        Err(ParleyError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn scheduler_starts_due_campaigns() {
    let harness = TestHarness::builder().build().await.unwrap();
    let due = draft(&harness, "Hello", &PHONES[..1]).await;
    let later = draft(&harness, "Later", &PHONES[1..2]).await;
    harness
        .campaigns
        .schedule(&due, "2000-01-01T00:00:00Z")
        .await
        .unwrap();
    let scheduled = harness
        .campaigns
        .schedule(&later, "2099-01-01T00:00:00+00:00")
        .await
        .unwrap();
    assert_eq!(scheduled.status, CampaignStatus::Scheduled);
    assert_eq!(
        scheduled.scheduled_for.as_deref(),
        Some("2099-01-01T00:00:00.000Z")
    );

    let scheduler = CampaignScheduler::new(harness.campaigns.clone(), Duration::from_secs(60));
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    wait_for_status(&harness, &due, CampaignStatus::Completed).await;

    assert_eq!(
        harness.campaigns.get(&later).await.unwrap().campaign.status,
        CampaignStatus::Scheduled
    );
    assert!(matches!(
        harness.campaigns.execute(&later).await,
        Err(ParleyError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn create_validates_input() {
    let harness = TestHarness::builder().build().await.unwrap();
    for request in [
        NewCampaign {
            name: " ".into(),
            channel_id: MOCK_CHANNEL_ID.into(),
            template: "x".into(),
        },
        NewCampaign {
            name: "n".into(),
            channel_id: "telegram".into(),
            template: "x".into(),
        },
    ] {
        assert!(matches!(
            harness.campaigns.create(request, None).await,
            Err(ParleyError::Validation(_))
        ));
    }
}

async fn stored_status(harness: &TestHarness, id: &str) -> CampaignStatus {
    campaigns::get_campaign(harness.database(), id)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn campaign_left_sending_resumes_on_next_tick() {
    let harness = TestHarness::builder().build().await.unwrap();
    let id = draft(&harness, "Hello", &PHONES[..1]).await;
    // A process that died right after promoting the campaign.
    campaigns::transition(
        harness.database(),
        &id,
        &[CampaignStatus::Draft],
        CampaignStatus::Sending,
        None,
    )
    .await
    .unwrap()
    .unwrap();

    let restarted = CampaignExecutor::new(harness.engine.clone(), harness.config.campaign.clone());
    let scheduler = CampaignScheduler::new(restarted.clone(), Duration::from_secs(60));
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    wait_for_status(&harness, &id, CampaignStatus::Completed).await;

    let report = harness.campaigns.get(&id).await.unwrap();
    assert_eq!(report.counts.sent_count, 1);
    assert_eq!(harness.mock_channel.call_count(), 1);
    assert_eq!(scheduler.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn live_runs_are_not_resumed_twice() {
    let harness = TestHarness::builder()
        .with_channel(MockChannel::new(MOCK_CHANNEL_ID).with_delay(Duration::from_millis(50)))
        .with_workers(1)
        .build()
        .await
        .unwrap();
    let id = draft(&harness, "Hello", &PHONES).await;
    harness.campaigns.start(&id).await.unwrap();

    assert_eq!(harness.campaigns.resume_interrupted().await.unwrap(), 0);
    wait_for_status(&harness, &id, CampaignStatus::Completed).await;
    assert_eq!(harness.mock_channel.call_count(), 3);
}

#[tokio::test]
async fn shutdown_leaves_campaign_sending_for_the_next_process() {
    let harness = TestHarness::builder()
        .with_channel(MockChannel::new(MOCK_CHANNEL_ID).with_delay(Duration::from_millis(100)))
        .with_workers(1)
        .build()
        .await
        .unwrap();
    let id = draft(&harness, "Hello", &PHONES).await;
    harness.campaigns.start(&id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert!(harness.campaigns.shutdown(Duration::from_secs(5)).await);
    assert_eq!(stored_status(&harness, &id).await, CampaignStatus::Sending);
    assert_eq!(harness.mock_channel.call_count(), 1);
    assert_eq!(harness.campaigns.resume_interrupted().await.unwrap(), 0);

    let restarted = CampaignExecutor::new(harness.engine.clone(), harness.config.campaign.clone());
    assert_eq!(restarted.resume_interrupted().await.unwrap(), 1);
    wait_for_status(&harness, &id, CampaignStatus::Completed).await;

    // Only the two recipients without a message are dispatched again.
    assert_eq!(harness.mock_channel.call_count(), 3);
    assert_eq!(harness.campaigns.get(&id).await.unwrap().counts.sent_count, 3);
}

#[tokio::test]
async fn recipient_load_failure_keeps_campaign_sending() {
    let harness = TestHarness::builder().build().await.unwrap();
    let id = draft(&harness, "Hello", &PHONES[..2]).await;
    campaigns::transition(
        harness.database(),
        &id,
        &[CampaignStatus::Draft],
        CampaignStatus::Sending,
        None,
    )
    .await
    .unwrap()
    .unwrap();

    harness
        .database()
        .connection()
        .call(|conn| conn.execute_batch("ALTER TABLE campaign_recipients RENAME TO recipients_offline"))
        .await
        .unwrap();
    let faulted = CampaignExecutor::new(harness.engine.clone(), harness.config.campaign.clone());
    assert_eq!(faulted.resume_interrupted().await.unwrap(), 1);
    assert!(faulted.shutdown(Duration::from_secs(5)).await);
    assert_eq!(stored_status(&harness, &id).await, CampaignStatus::Sending);
    assert_eq!(harness.mock_channel.call_count(), 0);

    harness
        .database()
        .connection()
        .call(|conn| conn.execute_batch("ALTER TABLE recipients_offline RENAME TO campaign_recipients"))
        .await
        .unwrap();
    let scheduler = CampaignScheduler::new(harness.campaigns.clone(), Duration::from_secs(60));
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    wait_for_status(&harness, &id, CampaignStatus::Completed).await;
    assert_eq!(harness.mock_channel.call_count(), 2);
}

#[tokio::test]
async fn counts_never_exceed_total_during_a_run() {
    let phones = [
        "5511900000001",
        "5511900000002",
        "5511900000003",
        "5511900000004",
        "5511900000005",
        "5511900000006",
    ];
    let harness = TestHarness::builder()
        .with_channel(MockChannel::new(MOCK_CHANNEL_ID).with_delay(Duration::from_millis(20)))
        .with_workers(2)
        .build()
        .await
        .unwrap();
    harness.mock_channel.fail_recipient(
        "5511900000004@s.whatsapp.net",
        ChannelError::PermanentRejection("not on whatsapp".into()),
    );
    let id = draft(&harness, "Hello", &phones).await;
    harness.campaigns.start(&id).await.unwrap();

    let mut observations = 0;
    loop {
        let report = harness.campaigns.get(&id).await.unwrap();
        let counts = report.counts;
        assert_eq!(counts.total_recipients, 6);
        assert!(
            counts.sent_count + counts.failed_count <= counts.total_recipients,
            "{counts:?}"
        );
        observations += 1;
        if report.campaign.status == CampaignStatus::Completed {
            assert_eq!(counts.sent_count, 5);
            assert_eq!(counts.failed_count, 1);
            break;
        }
        assert!(observations < 1000, "campaign never completed");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(observations > 1);
}
