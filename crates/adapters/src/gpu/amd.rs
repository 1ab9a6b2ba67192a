// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! AMD probe via `rocm-smi`.

use super::{GpuProbe, ProbeError};
use crate::subprocess::{run_with_timeout, GPU_PROBE_TIMEOUT};
use async_trait::async_trait;
use hive_core::{GpuDevice, GpuReading};
use serde_json::Value;
use tokio::process::Command;

/// Probe backed by `rocm-smi --showmeminfo vram --showuse --json`.
pub struct RocmSmiProbe;

fn field_u64(card: &Value, key: &str) -> Result<u64, ProbeError> {
    let raw = card
        .get(key)
        .ok_or_else(|| ProbeError::Parse(format!("missing field {key}")))?;
    match raw {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ProbeError::Parse(format!("negative value for {key}"))),
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| ProbeError::Parse(format!("bad number '{s}' for {key}"))),
        other => Err(ProbeError::Parse(format!(
            "unexpected value {other} for {key}"
        ))),
    }
}

fn field_f32(card: &Value, key: &str) -> f32 {
    match card.get(key) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) as f32,
        Some(Value::String(s)) => s.trim().parse::<f32>().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Parse `rocm-smi` JSON output.
///
/// Top-level keys are `cardN` objects carrying VRAM totals in bytes and a
/// `GPU use (%)` percentage.
fn parse_json(output: &str) -> Result<Vec<GpuDevice>, ProbeError> {
    let root: Value =
        serde_json::from_str(output).map_err(|e| ProbeError::Parse(e.to_string()))?;
    let map = root
        .as_object()
        .ok_or_else(|| ProbeError::Parse("expected JSON object".to_string()))?;

    let mut devices = Vec::new();
    for (key, card) in map {
        let Some(index_str) = key.strip_prefix("card") else {
            continue;
        };
        let index: u32 = index_str
            .parse()
            .map_err(|_| ProbeError::Parse(format!("bad card key: {key}")))?;

        let total_b = field_u64(card, "VRAM Total Memory (B)")?;
        let used_b = field_u64(card, "VRAM Total Used Memory (B)")?;
        let total_mb = total_b / (1024 * 1024);
        let used_mb = used_b / (1024 * 1024);

        devices.push(GpuDevice {
            index,
            name: card
                .get("Card series")
                .and_then(|v| v.as_str())
                .unwrap_or("AMD GPU")
                .to_string(),
            total_mb,
            used_mb,
            free_mb: total_mb.saturating_sub(used_mb),
            utilization_pct: field_f32(card, "GPU use (%)"),
        });
    }

    if devices.is_empty() {
        return Err(ProbeError::Parse("no cards in output".to_string()));
    }
    devices.sort_by_key(|d| d.index);
    Ok(devices)
}

#[async_trait]
impl GpuProbe for RocmSmiProbe {
    fn name(&self) -> &'static str {
        "rocm-smi"
    }

    async fn probe(&self) -> Result<GpuReading, ProbeError> {
        let mut cmd = Command::new("rocm-smi");
        cmd.arg("--showmeminfo").arg("vram").arg("--showuse").arg("--json");

        let output = run_with_timeout(cmd, GPU_PROBE_TIMEOUT, "rocm-smi")
            .await
            .map_err(ProbeError::Unavailable)?;

        if !output.status.success() {
            return Err(ProbeError::Unavailable(format!(
                "rocm-smi exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(GpuReading::from_devices(parse_json(&stdout)?))
    }
}

#[cfg(test)]
#[path = "amd_tests.rs"]
mod tests;
