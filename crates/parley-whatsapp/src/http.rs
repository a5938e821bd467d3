// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared HTTP plumbing: client construction and response classification.

use std::time::Duration;

use parley_core::{ChannelError, ParleyError};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use tracing::debug;

/// Connect timeout for provider APIs. The pipeline bounds the whole call.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a pooled client with the given default headers.
pub(crate) fn build_client(headers: HeaderMap) -> Result<reqwest::Client, ParleyError> {
    reqwest::Client::builder()
        .default_headers(headers)
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| ParleyError::Channel {
            message: format!("failed to build HTTP client: {e}"),
            source: Some(Box::new(e)),
        })
}

/// Network-level failures never reached the provider's business logic.
pub(crate) fn transport_error(e: reqwest::Error) -> ChannelError {
    if e.is_timeout() {
        ChannelError::Transient(format!("request timed out: {e}"))
    } else {
        ChannelError::Transient(format!("HTTP request failed: {e}"))
    }
}

/// Parse a `Retry-After` header given in delta-seconds.
pub(crate) fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Classify a non-success response from its status, headers, and body.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> ChannelError {
    match ChannelError::from_status(status.as_u16(), body) {
        ChannelError::RateLimited { message, .. } => ChannelError::RateLimited {
            message,
            retry_after: retry_after(headers),
        },
        other => other,
    }
}

/// Read a response, returning its JSON body on success.
///
/// `classify` maps a failed response to the send taxonomy; providers with
/// structured error bodies pass their own.
pub(crate) async fn read_json<F>(
    response: reqwest::Response,
    classify: F,
) -> Result<serde_json::Value, ChannelError>
where
    F: FnOnce(StatusCode, &HeaderMap, &str) -> ChannelError,
{
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.text().await.map_err(transport_error)?;
    debug!(status = %status, "provider response received");

    if !status.is_success() {
        return Err(classify(status, &headers, &body));
    }

    if body.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    serde_json::from_str(&body).map_err(|e| {
        ChannelError::Transient(format!("failed to parse provider response: {e}"))
    })
}

/// Download media from a URL so it can be inlined or re-encoded.
pub(crate) async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
) -> Result<Vec<u8>, ChannelError> {
    let response = client.get(url).send().await.map_err(transport_error)?;
    let status = response.status();
    if !status.is_success() {
        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        return Err(match classify_status(status, &headers, &body) {
            // A media host refusing access says nothing about the channel's credentials.
            ChannelError::Auth(m) => ChannelError::PermanentRejection(m),
            other => other,
        });
    }
    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(transport_error)
}

/// Render a provider unix timestamp in the storage format.
pub(crate) fn format_unix(secs: i64) -> Option<String> {
    chrono::DateTime::from_timestamp(secs, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

/// Read a unix timestamp that providers send as either a number or a string.
pub(crate) fn unix_field(value: Option<&serde_json::Value>) -> Option<i64> {
    match value? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Object(o) => o.get("low").and_then(|v| v.as_i64()),
        _ => None,
    }
}
