// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP surface for the Parley delivery engine.
//!
//! Provider callbacks land on `/webhooks/{channelId}`; the management API
//! under `/v1` sends messages, controls conversations and campaigns, and
//! manages webhook subscriptions. Live updates stream over WebSocket
//! (`/v1/live`) or SSE (`/v1/live/events`).

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod sse;
pub mod ws;

pub use auth::{AuthConfig, Caller};
pub use error::{ApiError, ApiResult};
pub use server::{GatewayState, HealthState, ServerConfig, router, start_server};
