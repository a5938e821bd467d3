// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unauthenticated health and metrics endpoints.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use parley_core::types::HealthStatus;
use serde::Serialize;

use crate::server::GatewayState;

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "healthy", "degraded", or "unhealthy".
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub storage: String,
    pub channels: BTreeMap<String, String>,
}

fn describe(status: &HealthStatus) -> String {
    match status {
        HealthStatus::Healthy => "healthy".to_string(),
        HealthStatus::Degraded(reason) => format!("degraded: {reason}"),
        HealthStatus::Unhealthy(reason) => format!("unhealthy: {reason}"),
    }
}

/// GET /health
///
/// 200 unless storage is unreachable. Channel trouble shows as "degraded".
pub async fn get_public_health(State(state): State<GatewayState>) -> Response {
    let storage = state.engine.database().ping().await;
    let providers = state.engine.provider_health().await;

    let degraded = providers
        .iter()
        .any(|(_, s)| !matches!(s, HealthStatus::Healthy));
    let (status, code) = match (&storage, degraded) {
        (Err(_), _) => ("unhealthy", StatusCode::SERVICE_UNAVAILABLE),
        (Ok(()), true) => ("degraded", StatusCode::OK),
        (Ok(()), false) => ("healthy", StatusCode::OK),
    };

    let body = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        storage: match storage {
            Ok(()) => "ok".to_string(),
            Err(e) => e.to_string(),
        },
        channels: providers
            .iter()
            .map(|(id, s)| (id.clone(), describe(s)))
            .collect(),
    };
    (code, Json(body)).into_response()
}

/// GET /metrics
pub async fn get_public_metrics(State(state): State<GatewayState>) -> Response {
    match &state.health.prometheus_render {
        Some(render) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}
