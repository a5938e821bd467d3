// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capped exponential backoff with jitter.

use std::time::Duration;

use parley_config::model::{PipelineConfig, WebhookConfig};
use rand::Rng;

/// Retry schedule shared by the message pipeline and webhook delivery.
///
/// `max_attempts` counts every attempt including the first, so a policy with
/// `max_attempts = 1` never retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_attempts: u32,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max,
            max_attempts: max_attempts.max(1),
            jitter: true,
        }
    }

    /// Policy with no waiting between attempts. Used by tests and harnesses.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            base: Duration::ZERO,
            max: Duration::ZERO,
            max_attempts: max_attempts.max(1),
            jitter: false,
        }
    }

    pub fn from_pipeline(config: &PipelineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    pub fn from_webhook(config: &WebhookConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Delay before retry number `retry` (1-based).
    ///
    /// `base * 2^(retry-1)` capped at `max`. With jitter the result is drawn
    /// from `[d/2, d]`, so it never exceeds the cap.
    pub fn delay(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(20);
        let raw = self.base.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max);
        if !self.jitter || capped.is_zero() {
            return capped;
        }
        let ms = capped.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(ms / 2..=ms))
    }

    /// Delay honoring a provider-supplied `retry_after`, still capped at `max`.
    pub fn delay_with_hint(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.max(self.delay(retry)).min(self.max),
            None => self.delay(retry),
        }
    }
}
