// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GPU monitoring.
//!
//! Vendor query tools are tried in a fixed order (NVIDIA, AMD, Intel) and
//! their output normalized to the common [`GpuReading`] shape. When every
//! probe fails, the snapshot is marked unavailable with a timestamp and
//! downstream logic assumes conservative: no scale-up from GPU headroom.

mod amd;
mod intel;
mod nvidia;

pub use amd::RocmSmiProbe;
pub use intel::XpuSmiProbe;
pub use nvidia::NvidiaSmiProbe;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeGpuProbe;

use async_trait::async_trait;
use hive_core::{Clock, GpuReading, GpuSnapshot, SystemClock};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Errors from a single vendor probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe unavailable: {0}")]
    Unavailable(String),
    #[error("probe output unparseable: {0}")]
    Parse(String),
}

/// A vendor-specific GPU query.
#[async_trait]
pub trait GpuProbe: Send + Sync {
    fn name(&self) -> &'static str;

    async fn probe(&self) -> Result<GpuReading, ProbeError>;
}

/// Static memory hints per model, most specific first.
///
/// Matching is prefix-based so `llama3:70b-instruct` resolves through its
/// base entry.
const MODEL_MEMORY_MB: &[(&str, u64)] = &[
    ("llama3:70b", 40_960),
    ("llama3:8b", 6_144),
    ("llama3", 6_144),
    ("codellama", 6_656),
    ("mistral", 5_120),
    ("gemma2", 6_144),
    ("qwen2", 5_632),
    ("phi3", 4_096),
];

/// Conservative default for models absent from the table.
pub const DEFAULT_MODEL_MEMORY_MB: u64 = 4_096;

/// Recommended GPU memory for running one worker of the given model.
pub fn recommended_memory_mb(model: &str) -> u64 {
    MODEL_MEMORY_MB
        .iter()
        .find(|(name, _)| model.starts_with(name))
        .map(|(_, mb)| *mb)
        .unwrap_or(DEFAULT_MODEL_MEMORY_MB)
}

/// Handle to a running `watch` task; dropping it or calling `cancel`
/// stops the timer.
pub struct WatchHandle {
    cancel_tx: mpsc::Sender<()>,
    task: tokio::task::JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watch task.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(()).await;
        let _ = self.task.await;
    }
}

/// Polls vendor probes and produces normalized snapshots.
pub struct GpuMonitor<C: Clock = SystemClock> {
    probes: Vec<Box<dyn GpuProbe>>,
    clock: C,
}

impl GpuMonitor<SystemClock> {
    /// Monitor with the default vendor chain.
    pub fn new() -> Self {
        Self::with_probes(
            vec![
                Box::new(NvidiaSmiProbe),
                Box::new(RocmSmiProbe),
                Box::new(XpuSmiProbe),
            ],
            SystemClock,
        )
    }
}

impl Default for GpuMonitor<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> GpuMonitor<C> {
    /// Monitor with an explicit probe chain (first success wins).
    pub fn with_probes(probes: Vec<Box<dyn GpuProbe>>, clock: C) -> Self {
        Self { probes, clock }
    }

    /// Try each probe in order; the first success becomes the snapshot.
    pub async fn snapshot(&self) -> GpuSnapshot {
        let at_ms = self.clock.epoch_ms();
        for probe in &self.probes {
            match probe.probe().await {
                Ok(reading) => {
                    return GpuSnapshot::Available { reading, at_ms };
                }
                Err(e) => {
                    debug!(probe = probe.name(), error = %e, "gpu probe failed");
                }
            }
        }
        GpuSnapshot::Unavailable { at_ms }
    }

    /// Invoke `callback` with a fresh snapshot at the given cadence.
    ///
    /// Runs on a dedicated task until the returned handle is cancelled.
    pub fn watch<F>(self: Arc<Self>, interval: Duration, callback: F) -> WatchHandle
    where
        F: Fn(GpuSnapshot) + Send + Sync + 'static,
    {
        let (cancel_tx, mut cancel_rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        callback(self.snapshot().await);
                    }
                    _ = cancel_rx.recv() => break,
                }
            }
        });
        WatchHandle { cancel_tx, task }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
