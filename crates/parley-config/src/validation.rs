// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as ordered retry delays, per-kind channel credentials, and unique ids.

use std::collections::HashSet;

use parley_core::types::ChannelKind;

use crate::diagnostic::ConfigError;
use crate::model::{ChannelConfig, ParleyConfig};

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &ParleyConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ConfigError::Validation { message });

    let host = config.server.host.trim();
    if host.is_empty() {
        push("server.host must not be empty".to_string());
    } else if host.parse::<std::net::IpAddr>().is_err()
        && !host
            .chars()
            .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        push(format!(
            "server.host `{host}` is not a valid IP address or hostname"
        ));
    }

    if config.server.port == 0 {
        push("server.port must be non-zero".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        push("storage.database_path must not be empty".to_string());
    }

    let pipeline = &config.pipeline;
    if pipeline.max_attempts == 0 {
        push("pipeline.max_attempts must be at least 1".to_string());
    }
    if pipeline.base_delay_ms > pipeline.max_delay_ms {
        push(format!(
            "pipeline.base_delay_ms ({}) must not exceed pipeline.max_delay_ms ({})",
            pipeline.base_delay_ms, pipeline.max_delay_ms
        ));
    }
    if pipeline.send_timeout_secs == 0 {
        push("pipeline.send_timeout_secs must be non-zero".to_string());
    }

    if config.campaign.default_workers == 0 {
        push("campaign.default_workers must be at least 1".to_string());
    }
    for (channel, workers) in &config.campaign.workers {
        if *workers == 0 {
            push(format!("campaign.workers.{channel} must be at least 1"));
        }
    }

    let webhook = &config.webhook;
    if webhook.max_attempts == 0 {
        push("webhook.max_attempts must be at least 1".to_string());
    }
    if webhook.base_delay_ms > webhook.max_delay_ms {
        push(format!(
            "webhook.base_delay_ms ({}) must not exceed webhook.max_delay_ms ({})",
            webhook.base_delay_ms, webhook.max_delay_ms
        ));
    }
    if webhook.max_concurrent == 0 {
        push("webhook.max_concurrent must be at least 1".to_string());
    }

    let mut seen_ids = HashSet::new();
    for (i, channel) in config.channels.iter().enumerate() {
        if channel.id.trim().is_empty() {
            push(format!("channels[{i}].id must not be empty"));
        } else if !seen_ids.insert(channel.id.as_str()) {
            push(format!(
                "duplicate channel id `{}` in [[channels]] array",
                channel.id
            ));
        }
        for missing in missing_credentials(channel) {
            push(format!(
                "channels[{i}] (`{}`, kind {}) requires `{missing}`",
                channel.id, channel.kind
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn missing_credentials(channel: &ChannelConfig) -> Vec<&'static str> {
    let blank = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());
    let mut missing = Vec::new();
    if channel.base_url.trim().is_empty() {
        missing.push("base_url");
    }
    match channel.kind {
        ChannelKind::Bridge => {
            if blank(&channel.instance) {
                missing.push("instance");
            }
            if blank(&channel.api_key) {
                missing.push("api_key");
            }
        }
        ChannelKind::Cloud => {
            if blank(&channel.access_token) {
                missing.push("access_token");
            }
            if blank(&channel.phone_number_id) {
                missing.push("phone_number_id");
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_message(errors: &[ConfigError], needle: &str) -> bool {
        errors
            .iter()
            .any(|e| matches!(e, ConfigError::Validation { message } if message.contains(needle)))
    }

    #[test]
    fn default_config_validates() {
        assert!(validate_config(&ParleyConfig::default()).is_ok());
    }

    #[test]
    fn empty_database_path_fails_validation() {
        let mut config = ParleyConfig::default();
        config.storage.database_path = "".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "database_path"));
    }

    #[test]
    fn inverted_delays_fail_validation() {
        let mut config = ParleyConfig::default();
        config.pipeline.base_delay_ms = 10_000;
        config.pipeline.max_delay_ms = 10;
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "pipeline.base_delay_ms"));
    }

    #[test]
    fn all_errors_are_collected() {
        let mut config = ParleyConfig::default();
        config.server.port = 0;
        config.pipeline.max_attempts = 0;
        config.campaign.default_workers = 0;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn missing_channel_credentials_fail_validation() {
        let toml_str = r#"
[[channels]]
id = "wa"
kind = "cloud"
base_url = "https://graph.facebook.com"
access_token = "t"
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "phone_number_id"));
    }

    #[test]
    fn duplicate_channel_ids_fail_validation() {
        let toml_str = r#"
[[channels]]
id = "wa"
kind = "bridge"
base_url = "http://localhost"
instance = "a"
api_key = "k"

[[channels]]
id = "wa"
kind = "bridge"
base_url = "http://localhost"
instance = "b"
api_key = "k"
"#;
        let config: ParleyConfig = toml::from_str(toml_str).unwrap();
        let errors = validate_config(&config).unwrap_err();
        assert!(has_message(&errors, "duplicate channel id"));
    }
}
