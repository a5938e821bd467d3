// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WhatsApp channel adapters for the Parley delivery engine.
//!
//! Two providers implement [`ChannelAdapter`]: [`BridgeChannel`] for the
//! unofficial multi-device bridge and [`CloudChannel`] for the official
//! cloud API. Callers outside this crate never branch on the provider.

pub mod bridge;
pub mod cloud;
mod http;
pub mod media;
pub mod transcode;

use std::sync::Arc;

use parley_config::model::{ChannelConfig, MediaConfig};
use parley_core::ChannelAdapter;
use parley_core::ParleyError;
use parley_core::types::ChannelKind;
use tracing::info;

pub use bridge::BridgeChannel;
pub use cloud::CloudChannel;
pub use transcode::Transcoder;

/// Construct the adapter for one configured channel.
pub fn build_adapter(
    channel: &ChannelConfig,
    media: &MediaConfig,
) -> Result<Arc<dyn ChannelAdapter>, ParleyError> {
    let adapter: Arc<dyn ChannelAdapter> = match channel.kind {
        ChannelKind::Bridge => Arc::new(BridgeChannel::new(channel)?),
        ChannelKind::Cloud => Arc::new(CloudChannel::new(channel, media)?),
    };
    info!(channel_id = %channel.id, kind = %channel.kind, "channel adapter ready");
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::PluginAdapter;

    fn channel(kind: ChannelKind) -> ChannelConfig {
        ChannelConfig {
            id: format!("wa-{kind}"),
            name: None,
            kind,
            base_url: "http://localhost:9".into(),
            instance: Some("main".into()),
            api_key: Some("k".into()),
            access_token: Some("t".into()),
            phone_number_id: Some("1".into()),
            app_secret: None,
            verify_token: None,
            api_version: "v21.0".into(),
        }
    }

    #[test]
    fn builds_each_kind() {
        let media = MediaConfig::default();
        let bridge = build_adapter(&channel(ChannelKind::Bridge), &media).unwrap();
        assert_eq!(bridge.kind(), ChannelKind::Bridge);
        assert_eq!(bridge.channel_id(), "wa-bridge");
        let cloud = build_adapter(&channel(ChannelKind::Cloud), &media).unwrap();
        assert_eq!(cloud.kind(), ChannelKind::Cloud);
        assert_eq!(cloud.name(), "whatsapp-cloud");
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let mut cfg = channel(ChannelKind::Bridge);
        cfg.api_key = None;
        assert!(matches!(
            build_adapter(&cfg, &MediaConfig::default()),
            Err(ParleyError::Config(_))
        ));
    }
}
