// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation and message delivery engine.
//!
//! Resolves inbound provider events into contacts and conversations, runs
//! outbound messages through a monotonic status pipeline backed by a
//! persistent outbox, and publishes domain and live events on the bus.

pub mod conversations;
pub mod engine;
pub mod identity;
pub mod inbound;
pub mod locks;
pub mod metrics;
pub mod notify;
pub mod outbox;
pub mod parked;
pub mod pipeline;
pub mod registry;

pub use conversations::ConversationManager;
pub use engine::{ChannelStatus, Engine, EngineOptions};
pub use identity::{IdentityResolver, Sighting};
pub use inbound::{InboundProcessor, InboundSummary};
pub use notify::Notifier;
pub use outbox::OutboxWorker;
pub use parked::ParkedReceipts;
pub use pipeline::{Attempt, AttemptMode, MessagePipeline, PipelineOptions, SendRequest};
pub use registry::AdapterRegistry;
