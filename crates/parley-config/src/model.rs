// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Parley delivery engine.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::collections::HashMap;
use std::time::Duration;

use parley_core::types::ChannelKind;
use serde::{Deserialize, Serialize};

/// Top-level Parley configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable overrides.
/// All sections are optional and default to sensible values.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ParleyConfig {
    /// HTTP listener and API auth.
    #[serde(default)]
    pub server: ServerConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Outbound send retry and timeout policy.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Campaign worker pools and scheduling.
    #[serde(default)]
    pub campaign: CampaignConfig,

    /// Webhook fanout delivery policy.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Media handling.
    #[serde(default)]
    pub media: MediaConfig,

    /// Prometheus metrics exporter.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Configured messaging channels.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

impl ParleyConfig {
    /// Look up a channel by id.
    pub fn channel(&self, id: &str) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.id == id)
    }
}

/// HTTP server configuration.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Bearer token for the management API. `None` rejects every API request.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("bearer_token", &self.bearer_token.as_ref().map(|_| "[redacted]"))
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            bearer_token: None,
            log_level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL mode for concurrent reads.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: true,
        }
    }
}

fn default_database_path() -> String {
    "parley.db".to_string()
}

fn default_true() -> bool {
    true
}

/// Outbound message pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// First retry delay in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for any single retry delay in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Total attempts per message, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Timeout for one adapter call.
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,

    /// Outbox polling interval when idle.
    #[serde(default = "default_outbox_poll_ms")]
    pub outbox_poll_ms: u64,

    /// How long a claimed outbox row stays locked before another worker may reclaim it.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl PipelineConfig {
    /// Adapter call timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            send_timeout_secs: default_send_timeout_secs(),
            outbox_poll_ms: default_outbox_poll_ms(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_send_timeout_secs() -> u64 {
    30
}

fn default_outbox_poll_ms() -> u64 {
    250
}

fn default_lock_timeout_secs() -> u64 {
    300
}

/// Campaign executor configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignConfig {
    /// Worker pool size for channels without an explicit entry.
    #[serde(default = "default_workers")]
    pub default_workers: usize,

    /// Per-channel worker pool sizes, keyed by channel id.
    #[serde(default)]
    pub workers: HashMap<String, usize>,

    /// How often the scheduler looks for due SCHEDULED campaigns.
    #[serde(default = "default_scheduler_interval_secs")]
    pub scheduler_interval_secs: u64,
}

impl CampaignConfig {
    /// Worker pool size for a channel.
    pub fn workers_for(&self, channel_id: &str) -> usize {
        self.workers
            .get(channel_id)
            .copied()
            .unwrap_or(self.default_workers)
    }
}

impl Default for CampaignConfig {
    fn default() -> Self {
        Self {
            default_workers: default_workers(),
            workers: HashMap::new(),
            scheduler_interval_secs: default_scheduler_interval_secs(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_scheduler_interval_secs() -> u64 {
    15
}

/// Webhook fanout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Delivery attempts per subscription per event.
    #[serde(default = "default_webhook_attempts")]
    pub max_attempts: u32,

    /// First retry delay in milliseconds.
    #[serde(default = "default_webhook_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Ceiling for any single retry delay in milliseconds.
    #[serde(default = "default_webhook_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Timeout for one delivery attempt.
    #[serde(default = "default_webhook_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum concurrent deliveries across all subscriptions.
    #[serde(default = "default_webhook_concurrency")]
    pub max_concurrent: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_webhook_attempts(),
            base_delay_ms: default_webhook_base_delay_ms(),
            max_delay_ms: default_webhook_max_delay_ms(),
            timeout_secs: default_webhook_timeout_secs(),
            max_concurrent: default_webhook_concurrency(),
        }
    }
}

fn default_webhook_attempts() -> u32 {
    5
}

fn default_webhook_base_delay_ms() -> u64 {
    1_000
}

fn default_webhook_max_delay_ms() -> u64 {
    60_000
}

fn default_webhook_timeout_secs() -> u64 {
    10
}

fn default_webhook_concurrency() -> usize {
    16
}

/// Media handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MediaConfig {
    /// Path to an `ffmpeg` binary used to re-encode audio for restrictive providers.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,

    /// Largest media blob accepted into the store.
    #[serde(default = "default_max_inline_bytes")]
    pub max_inline_bytes: usize,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            max_inline_bytes: default_max_inline_bytes(),
        }
    }
}

fn default_max_inline_bytes() -> usize {
    16 * 1024 * 1024
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Expose `GET /metrics`.
    #[serde(default)]
    pub enabled: bool,
}

/// One configured connection to a messaging provider account.
#[derive(Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Stable channel id referenced by contacts and conversations.
    pub id: String,

    /// Display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Provider family.
    pub kind: ChannelKind,

    /// Provider API base URL.
    pub base_url: String,

    /// Bridge instance name.
    #[serde(default)]
    pub instance: Option<String>,

    /// Bridge API key.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Cloud API access token.
    #[serde(default)]
    pub access_token: Option<String>,

    /// Cloud API phone number id.
    #[serde(default)]
    pub phone_number_id: Option<String>,

    /// Cloud API app secret for `X-Hub-Signature-256` verification.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Cloud API webhook subscription verify token.
    #[serde(default)]
    pub verify_token: Option<String>,

    /// Cloud API graph version.
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl std::fmt::Debug for ChannelConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "[redacted]");
        f.debug_struct("ChannelConfig")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url)
            .field("instance", &self.instance)
            .field("api_key", &redact(&self.api_key))
            .field("access_token", &redact(&self.access_token))
            .field("phone_number_id", &self.phone_number_id)
            .field("app_secret", &redact(&self.app_secret))
            .field("verify_token", &redact(&self.verify_token))
            .field("api_version", &self.api_version)
            .finish()
    }
}

fn default_api_version() -> String {
    "v21.0".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channels_array_deserializes() {
        let toml_str = r#"
[[channels]]
id = "wa-bridge"
kind = "bridge"
base_url = "http://localhost:8081"
instance = "main"
api_key = "k"

[[channels]]
id = "wa-cloud"
kind = "cloud"
base_url = "https://graph.facebook.com"
access_token = "t"
phone_number_id = "1234"
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.channels[0].kind, ChannelKind::Bridge);
        assert_eq!(config.channels[1].api_version, "v21.0");
        assert!(config.channel("wa-cloud").is_some());
        assert!(config.channel("nope").is_none());
    }

    #[test]
    fn channel_debug_redacts_secrets() {
        let toml_str = r#"
[[channels]]
id = "wa"
kind = "bridge"
base_url = "http://localhost"
api_key = "super-secret"
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        let debug = format!("{:?}", config.channels[0]);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[redacted]"));
    }

    #[test]
    fn per_channel_workers_fall_back_to_default() {
        let mut campaign = CampaignConfig::default();
        campaign.workers.insert("wa".into(), 2);
        assert_eq!(campaign.workers_for("wa"), 2);
        assert_eq!(campaign.workers_for("other"), 4);
    }

    #[test]
    fn unknown_channel_kind_rejected() {
        let toml_str = r#"
[[channels]]
id = "x"
kind = "telegram"
base_url = "http://localhost"
"#;
        assert!(toml::from_str::<ParleyConfig>(toml_str).is_err());
    }
}
