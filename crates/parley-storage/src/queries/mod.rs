// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Query modules for CRUD operations on storage entities.

pub mod campaigns;
pub mod contacts;
pub mod conversations;
pub mod media;
pub mod messages;
pub mod outbox;
pub mod webhooks;
