// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-channel degradation state.
//!
//! A channel whose adapter reported an authentication failure is degraded:
//! sends on it fail fast without reaching the adapter until it is reset.

use dashmap::DashMap;
use parley_core::types::timestamp_now;
use serde::Serialize;
use tracing::{info, warn};

/// Health of one channel as seen by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelHealth {
    Healthy,
    Degraded { reason: String, since: String },
}

/// Snapshot row for health endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelHealthEntry {
    pub channel_id: String,
    #[serde(flatten)]
    pub health: ChannelHealth,
}

/// Concurrent registry of degraded channels.
#[derive(Debug, Default)]
pub struct ChannelHealthRegistry {
    degraded: DashMap<String, ChannelHealth>,
}

impl ChannelHealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a channel degraded. The first reason sticks until reset.
    pub fn mark_degraded(&self, channel_id: &str, reason: &str) {
        let mut newly = false;
        self.degraded
            .entry(channel_id.to_string())
            .or_insert_with(|| {
                newly = true;
                ChannelHealth::Degraded {
                    reason: reason.to_string(),
                    since: timestamp_now(),
                }
            });
        if newly {
            warn!(channel_id, reason, "channel degraded; sends will fail fast");
        }
    }

    /// Clear degradation. Returns whether the channel was degraded.
    pub fn reset(&self, channel_id: &str) -> bool {
        let was = self.degraded.remove(channel_id).is_some();
        if was {
            info!(channel_id, "channel degradation cleared");
        }
        was
    }

    /// The degradation reason, if the channel is degraded.
    pub fn degraded_reason(&self, channel_id: &str) -> Option<String> {
        self.degraded.get(channel_id).and_then(|h| match h.value() {
            ChannelHealth::Degraded { reason, .. } => Some(reason.clone()),
            ChannelHealth::Healthy => None,
        })
    }

    pub fn health(&self, channel_id: &str) -> ChannelHealth {
        self.degraded
            .get(channel_id)
            .map(|h| h.value().clone())
            .unwrap_or(ChannelHealth::Healthy)
    }

    /// Health for each of `channel_ids`, in the given order.
    pub fn snapshot<'a>(
        &self,
        channel_ids: impl IntoIterator<Item = &'a str>,
    ) -> Vec<ChannelHealthEntry> {
        channel_ids
            .into_iter()
            .map(|id| ChannelHealthEntry {
                channel_id: id.to_string(),
                health: self.health(id),
            })
            .collect()
    }
}
