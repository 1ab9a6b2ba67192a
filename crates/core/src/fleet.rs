// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fleet and GPU observations consumed by the autoscaler.

use crate::agent::{AgentId, AgentLifecycle};
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-device breakdown of a GPU reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub utilization_pct: f32,
}

/// Vendor-neutral GPU reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuReading {
    pub total_mb: u64,
    pub used_mb: u64,
    pub free_mb: u64,
    pub utilization_pct: f32,
    pub device_count: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<GpuDevice>,
}

impl GpuReading {
    /// Aggregate per-device readings into a single normalized reading.
    pub fn from_devices(devices: Vec<GpuDevice>) -> Self {
        let total_mb = devices.iter().map(|d| d.total_mb).sum();
        let used_mb = devices.iter().map(|d| d.used_mb).sum();
        let free_mb = devices.iter().map(|d| d.free_mb).sum();
        let utilization_pct = if devices.is_empty() {
            0.0
        } else {
            devices.iter().map(|d| d.utilization_pct).sum::<f32>() / devices.len() as f32
        };
        Self {
            total_mb,
            used_mb,
            free_mb,
            utilization_pct,
            device_count: devices.len() as u32,
            devices,
        }
    }
}

/// A point-in-time GPU observation with staleness tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GpuSnapshot {
    Available { reading: GpuReading, at_ms: u64 },
    Unavailable { at_ms: u64 },
}

impl GpuSnapshot {
    pub fn reading(&self) -> Option<&GpuReading> {
        match self {
            GpuSnapshot::Available { reading, .. } => Some(reading),
            GpuSnapshot::Unavailable { .. } => None,
        }
    }

    pub fn at_ms(&self) -> u64 {
        match self {
            GpuSnapshot::Available { at_ms, .. } | GpuSnapshot::Unavailable { at_ms } => *at_ms,
        }
    }
}

/// Histogram bucket upper bounds for enqueue-to-start waits, in ms.
const WAIT_BOUNDS_MS: [u64; 6] = [100, 500, 1_000, 5_000, 15_000, 60_000];

/// Histogram of enqueue-to-start wait times.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WaitHistogram {
    /// One count per bound in [`WAIT_BOUNDS_MS`], plus overflow.
    counts: [u64; 7],
    total_ms: u64,
    max_ms: u64,
    samples: u64,
}

impl WaitHistogram {
    pub fn record(&mut self, wait_ms: u64) {
        let bucket = WAIT_BOUNDS_MS
            .iter()
            .position(|&b| wait_ms <= b)
            .unwrap_or(WAIT_BOUNDS_MS.len());
        self.counts[bucket] += 1;
        self.total_ms += wait_ms;
        self.max_ms = self.max_ms.max(wait_ms);
        self.samples += 1;
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn mean_ms(&self) -> u64 {
        if self.samples == 0 {
            0
        } else {
            self.total_ms / self.samples
        }
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }
}

/// One worker's slot in the fleet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSlot {
    pub role: Role,
    pub lifecycle: AgentLifecycle,
    pub busy: bool,
}

/// The autoscaler's input: fleet shape, queue pressure, GPU state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub workers: BTreeMap<AgentId, WorkerSlot>,
    /// Pending-or-ready subtask count by priority.
    pub pending_by_priority: BTreeMap<i32, usize>,
    pub waits: WaitHistogram,
    pub gpu: GpuSnapshot,
}

impl FleetSnapshot {
    /// Workers in `active` lifecycle state.
    pub fn active_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.lifecycle == AgentLifecycle::Active)
            .count()
    }

    pub fn idle_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| w.lifecycle == AgentLifecycle::Active && !w.busy)
            .count()
    }

    /// Idle fraction of the active fleet; 0.0 for an empty fleet.
    pub fn idle_fraction(&self) -> f64 {
        let active = self.active_count();
        if active == 0 {
            0.0
        } else {
            self.idle_count() as f64 / active as f64
        }
    }

    /// Total queued (pending or ready) subtasks.
    pub fn queue_len(&self) -> usize {
        self.pending_by_priority.values().sum()
    }
}

#[cfg(test)]
#[path = "fleet_tests.rs"]
mod tests;
