// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Parley conversation and message delivery engine.
//!
//! This crate provides the error taxonomy, domain types, event types, and the
//! channel adapter contract used throughout the workspace.

pub mod address;
pub mod error;
pub mod events;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::{ChannelError, ParleyError};
pub use events::{DomainEvent, EventType, LiveUpdate};
pub use types::{AdapterType, HealthStatus, ProviderMessageId};

pub use traits::{ChannelAdapter, PluginAdapter};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parley_error_has_all_variants() {
        let _config = ParleyError::Config("test".into());
        let _storage = ParleyError::Storage {
            source: Box::new(std::io::Error::other("test")),
        };
        let _channel = ParleyError::Channel {
            message: "test".into(),
            source: None,
        };
        let _auth = ParleyError::ChannelAuth {
            channel_id: "wa".into(),
            message: "test".into(),
        };
        let _transient = ParleyError::ChannelTransient {
            channel_id: "wa".into(),
            message: "test".into(),
        };
        let _conflict = ParleyError::IdentityConflict {
            channel_id: "wa".into(),
            identifier: "x@lid".into(),
            message: "test".into(),
        };
        let _state = ParleyError::InvalidState {
            entity: "campaign",
            id: "c".into(),
            state: "COMPLETED".into(),
            operation: "execute",
        };
        let _validation = ParleyError::validation("test");
        let _missing = ParleyError::not_found("message", "m");
        let _webhook = ParleyError::Webhook {
            message: "test".into(),
            source: None,
        };
        let _timeout = ParleyError::Timeout {
            duration: std::time::Duration::from_secs(30),
        };
        let _internal = ParleyError::Internal("test".into());
    }

    #[test]
    fn adapter_type_round_trip() {
        use std::str::FromStr;

        for variant in [AdapterType::Channel, AdapterType::Storage] {
            let s = variant.to_string();
            let parsed = AdapterType::from_str(&s).expect("should parse back");
            assert_eq!(variant, parsed);
        }
    }

    #[test]
    fn health_status_serializes_with_reason() {
        let degraded = HealthStatus::Degraded("token expired".into());
        let json = serde_json::to_value(&degraded).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["reason"], "token expired");
        assert_ne!(degraded, HealthStatus::Healthy);
    }

    #[test]
    fn channel_adapter_is_object_safe() {
        fn _assert_dyn(_: &dyn ChannelAdapter) {}
    }
}
