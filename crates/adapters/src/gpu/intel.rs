// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Intel probe via `xpu-smi`.

use super::{GpuProbe, ProbeError};
use crate::subprocess::{run_with_timeout, GPU_PROBE_TIMEOUT};
use async_trait::async_trait;
use hive_core::{GpuDevice, GpuReading};
use serde_json::Value;
use tokio::process::Command;

/// Probe backed by `xpu-smi discovery -j` plus `xpu-smi dump`.
///
/// Discovery reports per-device physical memory; the dump adds current
/// utilization and used memory.
pub struct XpuSmiProbe;

fn value_u64(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_f64().map(|f| f as u64),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as u64),
        _ => None,
    }
}

/// Parse `xpu-smi discovery -j` output into device skeletons.
///
/// The `device_list` array carries `device_id` and `memory_physical_size_byte`.
fn parse_discovery(output: &str) -> Result<Vec<GpuDevice>, ProbeError> {
    let root: Value =
        serde_json::from_str(output).map_err(|e| ProbeError::Parse(e.to_string()))?;
    let list = root
        .get("device_list")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProbeError::Parse("missing device_list".to_string()))?;

    let mut devices = Vec::new();
    for entry in list {
        let index = entry
            .get("device_id")
            .and_then(value_u64)
            .ok_or_else(|| ProbeError::Parse("missing device_id".to_string()))?
            as u32;
        let total_b = entry
            .get("memory_physical_size_byte")
            .and_then(value_u64)
            .ok_or_else(|| ProbeError::Parse("missing memory_physical_size_byte".to_string()))?;
        let total_mb = total_b / (1024 * 1024);

        devices.push(GpuDevice {
            index,
            name: entry
                .get("device_name")
                .and_then(|v| v.as_str())
                .unwrap_or("Intel GPU")
                .to_string(),
            total_mb,
            used_mb: 0,
            free_mb: total_mb,
            utilization_pct: 0.0,
        });
    }

    if devices.is_empty() {
        return Err(ProbeError::Parse("no devices in discovery".to_string()));
    }
    Ok(devices)
}

/// Fold one device's `xpu-smi dump` CSV line into its skeleton.
///
/// Dump format with `-m 0,18`: `timestamp, device_id, util_pct, used_mb`.
fn apply_dump(devices: &mut [GpuDevice], output: &str) -> Result<(), ProbeError> {
    for line in output.lines().skip(1) {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() < 4 {
            continue;
        }
        let Some(index) = fields[1].parse::<u32>().ok() else {
            continue;
        };
        let Some(device) = devices.iter_mut().find(|d| d.index == index) else {
            continue;
        };
        device.utilization_pct = fields[2].parse().unwrap_or(0.0);
        device.used_mb = fields[3].parse::<f64>().unwrap_or(0.0) as u64;
        device.free_mb = device.total_mb.saturating_sub(device.used_mb);
    }
    Ok(())
}

#[async_trait]
impl GpuProbe for XpuSmiProbe {
    fn name(&self) -> &'static str {
        "xpu-smi"
    }

    async fn probe(&self) -> Result<GpuReading, ProbeError> {
        let mut discovery = Command::new("xpu-smi");
        discovery.arg("discovery").arg("-j");
        let output = run_with_timeout(discovery, GPU_PROBE_TIMEOUT, "xpu-smi discovery")
            .await
            .map_err(ProbeError::Unavailable)?;
        if !output.status.success() {
            return Err(ProbeError::Unavailable(format!(
                "xpu-smi exited with {}",
                output.status
            )));
        }
        let mut devices = parse_discovery(&String::from_utf8_lossy(&output.stdout))?;

        // Utilization and used memory come from a one-shot metrics dump;
        // if it fails we still report capacity.
        let mut dump = Command::new("xpu-smi");
        dump.arg("dump").arg("-d").arg("-1").arg("-m").arg("0,18").arg("-n").arg("1");
        if let Ok(output) = run_with_timeout(dump, GPU_PROBE_TIMEOUT, "xpu-smi dump").await {
            if output.status.success() {
                apply_dump(&mut devices, &String::from_utf8_lossy(&output.stdout))?;
            }
        }

        Ok(GpuReading::from_devices(devices))
    }
}

#[cfg(test)]
#[path = "intel_tests.rs"]
mod tests;
