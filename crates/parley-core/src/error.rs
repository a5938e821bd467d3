// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Parley delivery engine.

use std::time::Duration;

use thiserror::Error;

/// The primary error type used across all Parley crates.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// Configuration errors (invalid TOML, missing credentials, unknown channel kind).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Adapter plumbing errors that are not part of the send taxonomy
    /// (malformed inbound payloads, bad signatures, client construction).
    #[error("channel error: {message}")]
    Channel {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Channel credentials were rejected; the channel is degraded until reconfigured.
    #[error("channel {channel_id} rejected credentials: {message}")]
    ChannelAuth { channel_id: String, message: String },

    /// Retryable channel failure that could not be recovered locally.
    #[error("channel {channel_id} unavailable: {message}")]
    ChannelTransient { channel_id: String, message: String },

    /// Ambiguous identity merge. Resolved by precedence and logged.
    #[error("identity conflict on {channel_id} for {identifier}: {message}")]
    IdentityConflict {
        channel_id: String,
        identifier: String,
        message: String,
    },

    /// Operation not allowed in the entity's current lifecycle state.
    #[error("cannot {operation} {entity} {id} in state {state}")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
        operation: &'static str,
    },

    /// Malformed request, rejected before any state mutation.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Webhook delivery errors (never propagated to the originating operation).
    #[error("webhook error: {message}")]
    Webhook {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Shorthand for [`ParleyError::NotFound`].
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Shorthand for [`ParleyError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<serde_json::Error> for ParleyError {
    fn from(e: serde_json::Error) -> Self {
        ParleyError::Internal(format!("json: {e}"))
    }
}

/// Failure taxonomy returned by [`ChannelAdapter::send`](crate::ChannelAdapter::send).
///
/// The pipeline decides retry behaviour from the variant alone; adapters never retry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// Credentials invalid or expired. Fatal for the channel, never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Provider throttled the request.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    /// Network failure, timeout, or provider 5xx.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Provider refused the message (invalid recipient, unsupported media). Never retried.
    #[error("rejected by provider: {0}")]
    PermanentRejection(String),
}

impl ChannelError {
    /// Whether the pipeline may schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Transient(_))
    }

    /// Provider-supplied delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// Classify an HTTP status returned by a provider.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {status}: {}", truncate(body, 256));
        match status {
            401 | 403 => Self::Auth(message),
            429 => Self::RateLimited {
                message,
                retry_after: None,
            },
            408 | 500..=599 => Self::Transient(message),
            _ => Self::PermanentRejection(message),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
