// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const DISCOVERY: &str = r#"{
    "device_list": [
        {
            "device_id": 0,
            "device_name": "Intel(R) Arc(TM) A770 Graphics",
            "memory_physical_size_byte": "17179869184"
        }
    ]
}"#;

#[test]
fn parses_discovery_capacity() {
    let devices = parse_discovery(DISCOVERY).unwrap();
    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].name, "Intel(R) Arc(TM) A770 Graphics");
    assert_eq!(devices[0].total_mb, 16_384);
    assert_eq!(devices[0].free_mb, 16_384);
    assert_eq!(devices[0].used_mb, 0);
}

#[test]
fn dump_fills_in_utilization_and_used() {
    let mut devices = parse_discovery(DISCOVERY).unwrap();
    let dump = "\
Timestamp, DeviceId, GPU Utilization (%), GPU Memory Used (MiB)
06:14:46.000, 0, 42.5, 2048
";
    apply_dump(&mut devices, dump).unwrap();
    assert!((devices[0].utilization_pct - 42.5).abs() < f32::EPSILON);
    assert_eq!(devices[0].used_mb, 2_048);
    assert_eq!(devices[0].free_mb, 14_336);
}

#[test]
fn dump_lines_for_unknown_devices_are_ignored() {
    let mut devices = parse_discovery(DISCOVERY).unwrap();
    let dump = "\
Timestamp, DeviceId, GPU Utilization (%), GPU Memory Used (MiB)
06:14:46.000, 9, 99.0, 9999
";
    apply_dump(&mut devices, dump).unwrap();
    assert_eq!(devices[0].used_mb, 0);
}

#[test]
fn discovery_without_devices_is_an_error() {
    let err = parse_discovery(r#"{"device_list": []}"#).unwrap_err();
    assert!(matches!(err, ProbeError::Parse(_)));
}

#[test]
fn discovery_missing_memory_is_an_error() {
    let out = r#"{"device_list": [{"device_id": 0}]}"#;
    assert!(matches!(parse_discovery(out), Err(ProbeError::Parse(_))));
}
