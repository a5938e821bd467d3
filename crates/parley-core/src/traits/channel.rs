// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel adapter trait for messaging provider integrations.

use async_trait::async_trait;

use crate::error::{ChannelError, ParleyError};
use crate::traits::adapter::PluginAdapter;
use crate::types::{
    ChannelCapabilities, ChannelKind, NormalizedEvent, OutboundPayload, ProviderSendResult,
    SendContext,
};

/// Uniform send/receive contract implemented once per provider.
///
/// Adapters hold credentials and HTTP clients only. Conversation and message
/// state lives in the pipeline, and adapters never retry on their own.
#[async_trait]
pub trait ChannelAdapter: PluginAdapter {
    /// The configured channel id this adapter serves.
    fn channel_id(&self) -> &str;

    /// Provider family.
    fn kind(&self) -> ChannelKind;

    /// Returns the capabilities supported by this channel.
    fn capabilities(&self) -> ChannelCapabilities;

    /// Deliver one payload. Shapes media into whatever the provider accepts.
    async fn send(
        &self,
        ctx: &SendContext,
        payload: &OutboundPayload,
    ) -> Result<ProviderSendResult, ChannelError>;

    /// Translate a raw provider webhook body into normalized events.
    fn normalize_inbound(&self, raw: &serde_json::Value)
    -> Result<Vec<NormalizedEvent>, ParleyError>;

    /// Verify an inbound webhook signature. Providers without signing accept everything.
    fn verify_inbound(&self, _signature: Option<&str>, _body: &[u8]) -> Result<(), ParleyError> {
        Ok(())
    }

    /// Answer a provider subscription handshake, returning the challenge to echo.
    fn verify_subscription(&self, _mode: &str, _token: &str, _challenge: &str) -> Option<String> {
        None
    }
}
