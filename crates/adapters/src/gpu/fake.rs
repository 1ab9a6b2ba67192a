// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake GPU probe for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{GpuProbe, ProbeError};
use async_trait::async_trait;
use hive_core::{GpuDevice, GpuReading};
use parking_lot::Mutex;
use std::sync::Arc;

/// Fake probe returning a scripted reading (or failure).
#[derive(Clone)]
pub struct FakeGpuProbe {
    inner: Arc<Mutex<Option<GpuReading>>>,
    probes: Arc<Mutex<u32>>,
}

impl FakeGpuProbe {
    /// A probe that always fails (no GPU present).
    pub fn unavailable() -> Self {
        Self {
            inner: Arc::new(Mutex::new(None)),
            probes: Arc::new(Mutex::new(0)),
        }
    }

    /// A single-device probe with the given memory shape.
    pub fn with_memory(total_mb: u64, used_mb: u64) -> Self {
        let reading = GpuReading::from_devices(vec![GpuDevice {
            index: 0,
            name: "FakeGPU".to_string(),
            total_mb,
            used_mb,
            free_mb: total_mb.saturating_sub(used_mb),
            utilization_pct: 0.0,
        }]);
        Self {
            inner: Arc::new(Mutex::new(Some(reading))),
            probes: Arc::new(Mutex::new(0)),
        }
    }

    /// Replace the scripted reading; `None` makes the probe fail.
    pub fn set_reading(&self, reading: Option<GpuReading>) {
        *self.inner.lock() = reading;
    }

    /// How many times the probe ran.
    pub fn probe_count(&self) -> u32 {
        *self.probes.lock()
    }
}

#[async_trait]
impl GpuProbe for FakeGpuProbe {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn probe(&self) -> Result<GpuReading, ProbeError> {
        *self.probes.lock() += 1;
        self.inner
            .lock()
            .clone()
            .ok_or_else(|| ProbeError::Unavailable("no fake reading".to_string()))
    }
}
