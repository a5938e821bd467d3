// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel id to adapter lookup.

use std::collections::BTreeMap;
use std::sync::Arc;

use parley_config::model::ParleyConfig;
use parley_core::types::HealthStatus;
use parley_core::{ChannelAdapter, ParleyError, PluginAdapter};
use tracing::warn;

/// Adapters keyed by configured channel id.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: BTreeMap<String, Arc<dyn ChannelAdapter>>,
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("channels", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build one adapter per `[[channels]]` entry.
    pub fn from_config(config: &ParleyConfig) -> Result<Self, ParleyError> {
        let mut registry = Self::new();
        for channel in &config.channels {
            let adapter = parley_whatsapp::build_adapter(channel, &config.media)?;
            registry.register(adapter)?;
        }
        Ok(registry)
    }

    /// Add an adapter. Channel ids must be unique.
    pub fn register(&mut self, adapter: Arc<dyn ChannelAdapter>) -> Result<(), ParleyError> {
        let id = adapter.channel_id().to_string();
        if self.adapters.contains_key(&id) {
            return Err(ParleyError::Config(format!("duplicate channel id: {id}")));
        }
        self.adapters.insert(id, adapter);
        Ok(())
    }

    pub fn get(&self, channel_id: &str) -> Option<Arc<dyn ChannelAdapter>> {
        self.adapters.get(channel_id).cloned()
    }

    /// Look up a channel named by a caller. Unknown ids are a validation error.
    pub fn require(&self, channel_id: &str) -> Result<Arc<dyn ChannelAdapter>, ParleyError> {
        self.get(channel_id)
            .ok_or_else(|| ParleyError::validation(format!("unknown channel: {channel_id}")))
    }

    pub fn contains(&self, channel_id: &str) -> bool {
        self.adapters.contains_key(channel_id)
    }

    pub fn channel_ids(&self) -> impl Iterator<Item = &str> {
        self.adapters.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }

    /// Run every adapter's health check.
    pub async fn health(&self) -> Vec<(String, HealthStatus)> {
        let checks = self.adapters.iter().map(|(id, adapter)| async move {
            let status = match adapter.health_check().await {
                Ok(status) => status,
                Err(e) => {
                    warn!(channel_id = %id, error = %e, "health check failed");
                    HealthStatus::Unhealthy(e.to_string())
                }
            };
            (id.clone(), status)
        });
        futures::future::join_all(checks).await
    }

    /// Shut every adapter down, logging failures.
    pub async fn shutdown(&self) {
        for (id, adapter) in &self.adapters {
            if let Err(e) = adapter.shutdown().await {
                warn!(channel_id = %id, error = %e, "adapter shutdown failed");
            }
        }
    }
}
