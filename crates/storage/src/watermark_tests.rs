// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tempfile::tempdir;

fn agent(id: &str) -> AgentId {
    AgentId::new(id)
}

#[test]
fn missing_file_starts_empty() {
    let dir = tempdir().unwrap();
    let table = WatermarkTable::load(&dir.path().join("watermarks.json")).unwrap();
    assert_eq!(table.get(&agent("worker-1")), 0);
    assert!(table.min().is_none());
}

#[test]
fn advance_is_monotone() {
    let dir = tempdir().unwrap();
    let mut table = WatermarkTable::load(&dir.path().join("watermarks.json")).unwrap();

    assert!(table.advance(&agent("worker-1"), 5));
    assert!(!table.advance(&agent("worker-1"), 3));
    assert!(!table.advance(&agent("worker-1"), 5));
    assert_eq!(table.get(&agent("worker-1")), 5);

    assert!(table.advance(&agent("worker-1"), 9));
    assert_eq!(table.get(&agent("worker-1")), 9);
}

#[test]
fn min_spans_all_receivers() {
    let dir = tempdir().unwrap();
    let mut table = WatermarkTable::load(&dir.path().join("watermarks.json")).unwrap();

    table.advance(&agent("worker-1"), 10);
    table.advance(&agent("worker-2"), 4);
    assert_eq!(table.min(), Some(4));

    table.remove(&agent("worker-2"));
    assert_eq!(table.min(), Some(10));
}

#[test]
fn save_and_reload_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("watermarks.json");

    {
        let mut table = WatermarkTable::load(&path).unwrap();
        table.advance(&agent("worker-1"), 12);
        table.advance(&agent("queen"), 30);
        table.save_if_dirty().unwrap();
    }

    let table = WatermarkTable::load(&path).unwrap();
    assert_eq!(table.get(&agent("worker-1")), 12);
    assert_eq!(table.get(&agent("queen")), 30);
}

#[test]
fn save_is_skipped_when_clean() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("watermarks.json");

    let mut table = WatermarkTable::load(&path).unwrap();
    table.save_if_dirty().unwrap();
    // Nothing advanced, so nothing was written.
    assert!(!path.exists());
}

#[test]
fn corrupt_file_rotates_to_bak() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("watermarks.json");
    std::fs::write(&path, b"not json at all").unwrap();

    let table = WatermarkTable::load(&path).unwrap();
    assert_eq!(table.get(&agent("worker-1")), 0);
    assert!(path.with_extension("bak").exists());
}
