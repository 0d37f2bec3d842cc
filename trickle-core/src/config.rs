//! Viewer-side configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::flags::FrameOptions;

/// Bounds of the pipeline tick.
const MIN_TICK_MS: u64 = 7;
const MAX_TICK_MS: u64 = 25;

/// Settings for [`ScreenClient`](crate::client::ScreenClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Scheduling tick in milliseconds (clamped to 7–25).
    pub tick_interval_ms: u64,
    /// Largest frame the viewer accepts (0 = no limit).
    pub max_width: u32,
    pub max_height: u32,
    /// Options sent with every frame request.
    pub options: FrameOptions,
    /// Idle time before the pointer position is resent.
    pub input_idle_ms: u64,
    /// Time without a completed frame before the session is abandoned.
    pub stall_timeout_ms: u64,
    pub reconnect: ReconnectPolicy,
}

/// Exponential backoff between reconnect attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 15,
            max_width: 0,
            max_height: 0,
            options: FrameOptions::empty(),
            input_idle_ms: 100,
            stall_timeout_ms: 10_000,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
        }
    }
}

// ── Accessors ────────────────────────────────────────────────────

impl ClientConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.clamp(MIN_TICK_MS, MAX_TICK_MS))
    }

    pub fn input_idle(&self) -> Duration {
        Duration::from_millis(self.input_idle_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_millis(self.stall_timeout_ms.max(1))
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms))
    }
}

// ── Tests ────────────────────────────────────────────────────────
