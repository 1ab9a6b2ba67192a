// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fleet board.
//!
//! The board is the live directory of workers: role, lifecycle cell, busy
//! flag and the message currently being worked on. The agent manager writes
//! membership, workers flip their own busy state, and the autoscaler reads
//! snapshots. Lifecycle cells are shared with the dispatch bus so a single
//! write is visible everywhere.

use hive_core::{
    AgentId, AgentLifecycle, FleetSnapshot, GpuSnapshot, Message, Role, WaitHistogram, WorkerSlot,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Shared mutable lifecycle state of one agent.
pub type LifecycleCell = Arc<Mutex<AgentLifecycle>>;

struct WorkerEntry {
    role: Role,
    lifecycle: LifecycleCell,
    busy: bool,
    /// Origin message of the in-flight subtask, for worker-terminated
    /// error synthesis.
    current: Option<Message>,
}

#[derive(Default)]
struct BoardState {
    workers: BTreeMap<AgentId, WorkerEntry>,
    waits: WaitHistogram,
}

/// Live directory of the worker fleet.
#[derive(Clone, Default)]
pub struct FleetBoard {
    inner: Arc<Mutex<BoardState>>,
}

impl FleetBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker with its shared lifecycle cell.
    pub fn insert(&self, id: AgentId, role: Role, lifecycle: LifecycleCell) {
        self.inner.lock().workers.insert(
            id,
            WorkerEntry {
                role,
                lifecycle,
                busy: false,
                current: None,
            },
        );
    }

    /// Remove a worker from the board.
    pub fn remove(&self, id: &AgentId) {
        self.inner.lock().workers.remove(id);
    }

    /// Mark a worker busy with the given origin message.
    pub fn set_busy(&self, id: &AgentId, origin: Message) {
        if let Some(entry) = self.inner.lock().workers.get_mut(id) {
            entry.busy = true;
            entry.current = Some(origin);
        }
    }

    /// Mark a worker idle.
    pub fn set_idle(&self, id: &AgentId) {
        if let Some(entry) = self.inner.lock().workers.get_mut(id) {
            entry.busy = false;
            entry.current = None;
        }
    }

    /// The in-flight origin message of a worker, if any.
    pub fn current_work(&self, id: &AgentId) -> Option<Message> {
        self.inner
            .lock()
            .workers
            .get(id)
            .and_then(|e| e.current.clone())
    }

    /// Record one enqueue-to-start wait observation.
    pub fn record_wait(&self, wait_ms: u64) {
        self.inner.lock().waits.record(wait_ms);
    }

    /// Idle active workers in id order, with their roles.
    pub fn idle_workers(&self) -> Vec<(AgentId, Role)> {
        self.inner
            .lock()
            .workers
            .iter()
            .filter(|(_, e)| !e.busy && *e.lifecycle.lock() == AgentLifecycle::Active)
            .map(|(id, e)| (id.clone(), e.role))
            .collect()
    }

    /// Count of workers in `active` lifecycle state.
    pub fn active_count(&self) -> usize {
        self.inner
            .lock()
            .workers
            .values()
            .filter(|e| *e.lifecycle.lock() == AgentLifecycle::Active)
            .count()
    }

    /// All worker ids currently on the board.
    pub fn members(&self) -> Vec<AgentId> {
        self.inner.lock().workers.keys().cloned().collect()
    }

    /// Lifecycle of one worker.
    pub fn lifecycle_of(&self, id: &AgentId) -> Option<AgentLifecycle> {
        self.inner
            .lock()
            .workers
            .get(id)
            .map(|e| *e.lifecycle.lock())
    }

    /// Point-in-time fleet snapshot for the autoscaler.
    pub fn snapshot(
        &self,
        pending_by_priority: BTreeMap<i32, usize>,
        gpu: GpuSnapshot,
    ) -> FleetSnapshot {
        let state = self.inner.lock();
        let workers = state
            .workers
            .iter()
            .map(|(id, e)| {
                (
                    id.clone(),
                    WorkerSlot {
                        role: e.role,
                        lifecycle: *e.lifecycle.lock(),
                        busy: e.busy,
                    },
                )
            })
            .collect();
        FleetSnapshot {
            workers,
            pending_by_priority,
            waits: state.waits.clone(),
            gpu,
        }
    }
}

#[cfg(test)]
#[path = "board_tests.rs"]
mod tests;
