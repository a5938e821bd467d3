// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers, one module per resource.

pub mod campaigns;
pub mod channels;
pub mod conversations;
pub mod health;
pub mod inbound;
pub mod media;
pub mod messages;
pub mod webhooks;

use serde::Deserialize;

/// `?limit=&offset=` paging shared by list endpoints.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

impl Page {
    pub fn limit_or(&self, default: i64) -> i64 {
        self.limit.unwrap_or(default)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0)
    }
}
