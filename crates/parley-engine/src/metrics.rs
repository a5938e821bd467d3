// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade; without an installed recorder these are no-ops.

use metrics::{describe_counter, describe_histogram};

/// Register Parley metric descriptions. Called once after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "parley_messages_sent_total",
        "Outbound messages accepted by a provider"
    );
    describe_counter!(
        "parley_messages_failed_total",
        "Outbound messages that reached FAILED"
    );
    describe_counter!(
        "parley_send_retries_total",
        "Retryable send failures that were rescheduled"
    );
    describe_counter!(
        "parley_inbound_events_total",
        "Normalized inbound provider events by kind"
    );
    describe_counter!(
        "parley_webhook_deliveries_total",
        "Webhook deliveries by outcome"
    );
    describe_histogram!(
        "parley_send_latency_seconds",
        "Adapter send call latency in seconds"
    );
}

pub fn record_sent(channel: &str) {
    metrics::counter!("parley_messages_sent_total", "channel" => channel.to_string()).increment(1);
}

pub fn record_failed(channel: &str, reason: &'static str) {
    metrics::counter!(
        "parley_messages_failed_total",
        "channel" => channel.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_retry(channel: &str) {
    metrics::counter!("parley_send_retries_total", "channel" => channel.to_string()).increment(1);
}

/// `kind` is one of `message`, `duplicate`, `receipt`, `ignored`.
pub fn record_inbound(channel: &str, kind: &'static str) {
    metrics::counter!(
        "parley_inbound_events_total",
        "channel" => channel.to_string(),
        "kind" => kind
    )
    .increment(1);
}

pub fn record_send_latency(seconds: f64) {
    metrics::histogram!("parley_send_latency_seconds").record(seconds);
}
