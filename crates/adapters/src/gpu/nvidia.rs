// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! NVIDIA probe via `nvidia-smi`.

use super::{GpuProbe, ProbeError};
use crate::subprocess::{run_with_timeout, GPU_PROBE_TIMEOUT};
use async_trait::async_trait;
use hive_core::{GpuDevice, GpuReading};
use tokio::process::Command;

const QUERY_FIELDS: &str = "index,name,memory.total,memory.used,memory.free,utilization.gpu";

/// Probe backed by `nvidia-smi --query-gpu`.
pub struct NvidiaSmiProbe;

/// Parse `nvidia-smi --format=csv,noheader,nounits` output.
///
/// One line per device: `index, name, total_mb, used_mb, free_mb, util_pct`.
fn parse_csv(output: &str) -> Result<Vec<GpuDevice>, ProbeError> {
    let mut devices = Vec::new();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(|f| f.trim()).collect();
        if fields.len() != 6 {
            return Err(ProbeError::Parse(format!(
                "expected 6 fields, got {}: {line}",
                fields.len()
            )));
        }

        let parse_u64 = |s: &str| {
            s.parse::<u64>()
                .map_err(|_| ProbeError::Parse(format!("bad number '{s}' in: {line}")))
        };
        let parse_f32 = |s: &str| {
            s.parse::<f32>()
                .map_err(|_| ProbeError::Parse(format!("bad number '{s}' in: {line}")))
        };

        devices.push(GpuDevice {
            index: parse_u64(fields[0])? as u32,
            name: fields[1].to_string(),
            total_mb: parse_u64(fields[2])?,
            used_mb: parse_u64(fields[3])?,
            free_mb: parse_u64(fields[4])?,
            utilization_pct: parse_f32(fields[5])?,
        });
    }

    if devices.is_empty() {
        return Err(ProbeError::Parse("no devices in output".to_string()));
    }
    Ok(devices)
}

#[async_trait]
impl GpuProbe for NvidiaSmiProbe {
    fn name(&self) -> &'static str {
        "nvidia-smi"
    }

    async fn probe(&self) -> Result<GpuReading, ProbeError> {
        let mut cmd = Command::new("nvidia-smi");
        cmd.arg(format!("--query-gpu={QUERY_FIELDS}"))
            .arg("--format=csv,noheader,nounits");

        let output = run_with_timeout(cmd, GPU_PROBE_TIMEOUT, "nvidia-smi")
            .await
            .map_err(ProbeError::Unavailable)?;

        if !output.status.success() {
            return Err(ProbeError::Unavailable(format!(
                "nvidia-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(GpuReading::from_devices(parse_csv(&stdout)?))
    }
}

#[cfg(test)]
#[path = "nvidia_tests.rs"]
mod tests;
