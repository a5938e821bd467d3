// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilience primitives for the Parley delivery engine.
//!
//! - [`BackoffPolicy`]: capped exponential backoff with jitter for outbound
//!   sends and webhook deliveries.
//! - [`ChannelHealthRegistry`]: channels degraded by authentication failures.

pub mod backoff;
pub mod health;

pub use backoff::BackoffPolicy;
pub use health::{ChannelHealth, ChannelHealthEntry, ChannelHealthRegistry};
