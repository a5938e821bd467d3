// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Parley integration tests.
//!
//! Provides a mock channel and test harness infrastructure for fast,
//! deterministic, CI-runnable tests without external services.
//!
//! # Components
//!
//! - [`MockChannel`] - Scripted channel adapter with send capture and a JSON inbound format
//! - [`TestHarness`] - Engine, campaign executor, and bus over a temp database

pub mod harness;
pub mod mock_channel;

pub use harness::{MOCK_CHANNEL_ID, TestHarness, TestHarnessBuilder};
pub use mock_channel::{MockChannel, SentCall};
