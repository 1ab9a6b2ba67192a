// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hive_core::test_support::test_subtask_message;

fn cell(state: AgentLifecycle) -> LifecycleCell {
    Arc::new(Mutex::new(state))
}

#[test]
fn insert_and_idle_workers() {
    let board = FleetBoard::new();
    board.insert("worker-0".into(), Role::Developer, cell(AgentLifecycle::Active));
    board.insert("worker-1".into(), Role::Analyst, cell(AgentLifecycle::Active));

    let idle = board.idle_workers();
    assert_eq!(idle.len(), 2);
    assert_eq!(idle[0].0, "worker-0");
    assert_eq!(board.active_count(), 2);
}

#[test]
fn busy_workers_are_not_idle() {
    let board = FleetBoard::new();
    board.insert("worker-0".into(), Role::Generic, cell(AgentLifecycle::Active));

    let origin = test_subtask_message("s-1", "queen", "worker-0", 3);
    board.set_busy(&"worker-0".into(), origin.clone());
    assert!(board.idle_workers().is_empty());
    assert_eq!(board.current_work(&"worker-0".into()), Some(origin));

    board.set_idle(&"worker-0".into());
    assert_eq!(board.idle_workers().len(), 1);
    assert!(board.current_work(&"worker-0".into()).is_none());
}

#[test]
fn non_active_lifecycles_are_excluded() {
    let board = FleetBoard::new();
    let draining = cell(AgentLifecycle::Active);
    board.insert("worker-0".into(), Role::Generic, Arc::clone(&draining));
    board.insert("worker-1".into(), Role::Generic, cell(AgentLifecycle::Active));

    *draining.lock() = AgentLifecycle::Draining;
    assert_eq!(board.active_count(), 1);
    assert_eq!(board.idle_workers().len(), 1);
    assert_eq!(
        board.lifecycle_of(&"worker-0".into()),
        Some(AgentLifecycle::Draining)
    );
}

#[test]
fn remove_drops_worker() {
    let board = FleetBoard::new();
    board.insert("worker-0".into(), Role::Generic, cell(AgentLifecycle::Active));
    board.remove(&"worker-0".into());
    assert!(board.members().is_empty());
    assert!(board.lifecycle_of(&"worker-0".into()).is_none());
}

#[test]
fn snapshot_reflects_board_and_waits() {
    let board = FleetBoard::new();
    board.insert("worker-0".into(), Role::Developer, cell(AgentLifecycle::Active));
    board.set_busy(
        &"worker-0".into(),
        test_subtask_message("s-1", "queen", "worker-0", 0),
    );
    board.record_wait(40);
    board.record_wait(60);

    let mut pending = BTreeMap::new();
    pending.insert(0, 3usize);
    let snapshot = board.snapshot(pending, GpuSnapshot::Unavailable { at_ms: 1 });

    assert_eq!(snapshot.workers.len(), 1);
    assert!(snapshot.workers.values().next().map(|w| w.busy).unwrap_or(false));
    assert_eq!(snapshot.queue_len(), 3);
    assert_eq!(snapshot.waits.mean_ms(), 50);
    assert_eq!(snapshot.idle_count(), 0);
}
