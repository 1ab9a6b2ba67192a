// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized configuration.
//!
//! Every tunable the runtime consults lives here with an explicit default;
//! test fixtures pin values through these structs rather than relying on
//! defaults implicitly.

use crate::session::Architecture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors from parsing a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Autoscaling strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    GpuMemory,
    Workload,
    Hybrid,
    Conservative,
    Aggressive,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gpu-memory" => Ok(Strategy::GpuMemory),
            "workload" => Ok(Strategy::Workload),
            "hybrid" => Ok(Strategy::Hybrid),
            "conservative" => Ok(Strategy::Conservative),
            "aggressive" => Ok(Strategy::Aggressive),
            other => Err(format!("unknown strategy: {other}")),
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Strategy::GpuMemory => "gpu-memory",
            Strategy::Workload => "workload",
            Strategy::Hybrid => "hybrid",
            Strategy::Conservative => "conservative",
            Strategy::Aggressive => "aggressive",
        };
        write!(f, "{s}")
    }
}

/// Autoscaler tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    pub strategy: Strategy,
    pub min_workers: usize,
    /// None means "derive from GPU memory", clamped to at least min_workers.
    pub max_workers: Option<usize>,
    /// Control loop cadence.
    pub interval_ms: u64,
    /// Workload: queue length above which to scale up (H).
    pub queue_high: usize,
    /// Workload: mean wait above which to scale up (W).
    pub wait_high_ms: u64,
    /// Workload: idle fraction above which to scale down (I), held for two
    /// consecutive cycles.
    pub idle_fraction_high: f64,
    /// Gpu-memory: free memory needed before adding a worker.
    pub gpu_free_high_mb: u64,
    /// Gpu-memory: used-memory fraction above which to scale down.
    pub gpu_used_high_pct: f32,
    pub scale_up_cooldown_ms: u64,
    pub scale_down_cooldown_ms: u64,
    /// Memory held back from the GPU-derived worker cap.
    pub memory_buffer_mb: u64,
    /// Fraction of remaining memory left unused by the cap.
    pub safety_margin: f64,
    /// Largest single scale-up delta (aggressive strategy batches).
    pub max_batch_delta: usize,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Hybrid,
            min_workers: 1,
            max_workers: None,
            interval_ms: 15_000,
            queue_high: 5,
            wait_high_ms: 10_000,
            idle_fraction_high: 0.5,
            gpu_free_high_mb: 2_048,
            gpu_used_high_pct: 0.9,
            scale_up_cooldown_ms: 30_000,
            scale_down_cooldown_ms: 60_000,
            memory_buffer_mb: 1_024,
            safety_margin: 0.15,
            max_batch_delta: 4,
        }
    }
}

impl AutoscaleConfig {
    /// Cooldown for the given direction.
    pub fn cooldown(&self, scale_up: bool) -> Duration {
        if scale_up {
            Duration::from_millis(self.scale_up_cooldown_ms)
        } else {
            Duration::from_millis(self.scale_down_cooldown_ms)
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HiveConfig {
    /// Model passed through to the LLM backend.
    pub model: String,
    /// Initial worker count.
    pub workers: usize,
    pub architecture: Architecture,
    /// Folder worker file-save directives are confined to. None disables
    /// artifact writes entirely.
    pub project_folder: Option<PathBuf>,
    /// Base URL of the LLM backend.
    pub backend_url: String,
    /// Bounded inbox capacity per agent.
    pub inbox_capacity: usize,
    /// Per-message LLM call timeout.
    pub call_timeout_ms: u64,
    /// Transient backend retries per message (M).
    pub call_retries: u32,
    /// Coordinator-level retries per subtask (N).
    pub subtask_retries: u32,
    /// Base delay for exponential retry backoff.
    pub retry_backoff_ms: u64,
    /// How long `send` blocks on a full inbox before backpressure.
    pub send_timeout_ms: u64,
    /// Grace period before stragglers are force-terminated.
    pub grace_period_ms: u64,
    /// Sub-coordinator count for hierarchical sessions.
    pub sub_coordinators: usize,
    /// Enabled when --auto-scaling is passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoscale: Option<AutoscaleConfig>,
}

impl Default for HiveConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            workers: 3,
            architecture: Architecture::Centralized,
            project_folder: None,
            backend_url: "http://127.0.0.1:11434".to_string(),
            inbox_capacity: 64,
            call_timeout_ms: 120_000,
            call_retries: 2,
            subtask_retries: 3,
            retry_backoff_ms: 500,
            send_timeout_ms: 1_000,
            grace_period_ms: 5_000,
            sub_coordinators: 2,
            autoscale: None,
        }
    }
}

impl HiveConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Exponential backoff delay for the given retry attempt (1-based).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(10);
        Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }

    /// Parse from TOML, e.g. a `hive.toml` next to the state directory.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
