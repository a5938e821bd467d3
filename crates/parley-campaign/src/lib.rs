// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign execution for Parley.
//!
//! Drives bulk sends through the shared message pipeline with a bounded
//! worker pool per channel, cooperative cancellation, and a scheduler for
//! campaigns with a future start time. Counters are always derived from the
//! recipient rows.

pub mod executor;
pub mod scheduler;
pub mod template;

pub use executor::{CampaignExecutor, CampaignReport, ExecutionSummary, NewCampaign};
pub use scheduler::CampaignScheduler;

use metrics::describe_counter;
use parley_core::types::MessageStatus;

/// Register campaign metric descriptions.
pub fn register_metrics() {
    describe_counter!(
        "parley_campaign_recipients_total",
        "Campaign recipients processed, by settled status"
    );
}

pub(crate) fn record_recipient(channel: &str, status: MessageStatus) {
    metrics::counter!(
        "parley_campaign_recipients_total",
        "channel" => channel.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}
