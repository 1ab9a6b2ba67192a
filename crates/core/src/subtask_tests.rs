// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn subtask_id_displays_with_prefix() {
    assert_eq!(SubtaskId(3).to_string(), "st-3");
}

#[test]
fn subtask_id_orders_numerically() {
    assert!(SubtaskId(2) < SubtaskId(10));
}

#[test]
fn new_subtask_is_pending() {
    let s = Subtask::new(SubtaskId(0), "do something");
    assert_eq!(s.state, SubtaskState::Pending);
    assert_eq!(s.attempts, 0);
    assert!(s.deps.is_empty());
}

#[test]
fn terminal_states() {
    assert!(SubtaskState::Done.is_terminal());
    assert!(SubtaskState::Failed.is_terminal());
    assert!(!SubtaskState::InFlight.is_terminal());
    assert!(!SubtaskState::Ready.is_terminal());
}

#[test]
fn state_serde_uses_kebab_case() {
    let json = serde_json::to_string(&SubtaskState::InFlight).unwrap();
    assert_eq!(json, "\"in-flight\"");
}

#[test]
fn subtask_serde_skips_empty_fields() {
    let s = Subtask::new(SubtaskId(1), "t");
    let json = serde_json::to_string(&s).unwrap();
    assert!(!json.contains("required_role"));
    assert!(!json.contains("deps"));
    assert!(!json.contains("assigned_to"));
}
