// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The subtask dependency graph.
//!
//! The graph is owned by its session and mutated only through the methods
//! here, which keep the readiness invariant: a subtask is `ready` iff all of
//! its dependencies are `done`.

use crate::agent::AgentId;
use crate::role::Role;
use crate::subtask::{Subtask, SubtaskId, SubtaskState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Dependency graph over a session's subtasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtaskGraph {
    subtasks: BTreeMap<SubtaskId, Subtask>,
    next_id: u32,
}

impl SubtaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subtask and return its id.
    ///
    /// Dependencies pointing at unknown ids are dropped silently; they can
    /// only arise from inference bugs, not from user input.
    pub fn add(
        &mut self,
        text: impl Into<String>,
        required_role: Option<Role>,
        priority: i32,
        deps: BTreeSet<SubtaskId>,
        deadline_ms: Option<u64>,
    ) -> SubtaskId {
        let id = SubtaskId(self.next_id);
        self.next_id += 1;

        let mut subtask = Subtask::new(id, text);
        subtask.required_role = required_role;
        subtask.priority = priority;
        subtask.deps = deps
            .into_iter()
            .filter(|d| self.subtasks.contains_key(d))
            .collect();
        subtask.deadline_ms = deadline_ms;
        self.subtasks.insert(id, subtask);
        id
    }

    /// Add a dependency edge after both subtasks exist.
    ///
    /// Dependency inference may point in either direction ("using step 3"
    /// can reference a later index), so this is the path that can introduce
    /// cycles; callers run [`Self::break_cycles`] afterwards.
    pub fn add_dep(&mut self, id: SubtaskId, dep: SubtaskId) -> bool {
        if id == dep || !self.subtasks.contains_key(&dep) {
            return false;
        }
        match self.subtasks.get_mut(&id) {
            Some(s) => {
                s.deps.insert(dep);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: SubtaskId) -> Option<&Subtask> {
        self.subtasks.get(&id)
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subtask> {
        self.subtasks.values()
    }

    /// Detect dependency cycles and break them.
    ///
    /// Each detected cycle loses the in-cycle dependency edges of its
    /// smallest-id member; edges leaving the cycle are untouched. Returns one
    /// warning per cycle broken; an empty vec means the graph was already
    /// acyclic.
    pub fn break_cycles(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        while let Some(cycle) = self.find_cycle() {
            let members: BTreeSet<SubtaskId> = cycle.iter().copied().collect();
            let victim = match members.iter().next() {
                Some(id) => *id,
                None => break,
            };
            if let Some(subtask) = self.subtasks.get_mut(&victim) {
                let before = subtask.deps.len();
                subtask.deps.retain(|d| !members.contains(d));
                let dropped = before - subtask.deps.len();
                warnings.push(format!(
                    "dependency cycle through {} subtask(s): dropped {dropped} edge(s) from {victim}",
                    members.len()
                ));
            }
        }
        warnings
    }

    /// Find one dependency cycle, if any, as the list of ids on it.
    fn find_cycle(&self) -> Option<Vec<SubtaskId>> {
        // 0 = unvisited, 1 = on the current path, 2 = done
        let mut state: BTreeMap<SubtaskId, u8> = BTreeMap::new();
        let mut path = Vec::new();
        for &start in self.subtasks.keys() {
            if state.get(&start).copied().unwrap_or(0) == 0 {
                if let Some(cycle) = self.dfs_cycle(start, &mut state, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }

    fn dfs_cycle(
        &self,
        node: SubtaskId,
        state: &mut BTreeMap<SubtaskId, u8>,
        path: &mut Vec<SubtaskId>,
    ) -> Option<Vec<SubtaskId>> {
        state.insert(node, 1);
        path.push(node);

        if let Some(subtask) = self.subtasks.get(&node) {
            for &dep in &subtask.deps {
                match state.get(&dep).copied().unwrap_or(0) {
                    0 => {
                        if let Some(cycle) = self.dfs_cycle(dep, state, path) {
                            return Some(cycle);
                        }
                    }
                    1 => {
                        let pos = path.iter().position(|&p| p == dep).unwrap_or(0);
                        return Some(path[pos..].to_vec());
                    }
                    _ => {}
                }
            }
        }

        path.pop();
        state.insert(node, 2);
        None
    }

    /// Promote `pending` subtasks whose dependencies are all `done`.
    ///
    /// Returns the ids promoted to `ready` by this call.
    pub fn refresh_ready(&mut self) -> Vec<SubtaskId> {
        let done: BTreeSet<SubtaskId> = self
            .subtasks
            .values()
            .filter(|s| s.state == SubtaskState::Done)
            .map(|s| s.id)
            .collect();

        let mut promoted = Vec::new();
        for subtask in self.subtasks.values_mut() {
            if subtask.state == SubtaskState::Pending && subtask.deps.is_subset(&done) {
                subtask.state = SubtaskState::Ready;
                promoted.push(subtask.id);
            }
        }
        promoted
    }

    /// Ready subtasks ordered by `(priority desc, id asc)`.
    pub fn ready_queue(&self) -> Vec<SubtaskId> {
        let mut ready: Vec<&Subtask> = self
            .subtasks
            .values()
            .filter(|s| s.state == SubtaskState::Ready)
            .collect();
        ready.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        ready.iter().map(|s| s.id).collect()
    }

    /// Transition `ready → in-flight`, recording the assignee and attempt.
    pub fn mark_in_flight(&mut self, id: SubtaskId, worker: AgentId) {
        if let Some(s) = self.subtasks.get_mut(&id) {
            debug_assert_eq!(s.state, SubtaskState::Ready);
            s.state = SubtaskState::InFlight;
            s.assigned_to = Some(worker);
            s.attempts += 1;
        }
    }

    /// Transition `in-flight → done` with the worker's result.
    ///
    /// Redeliveries of an already-terminal subtask are ignored, which is what
    /// makes reassignment after a dead-letter idempotent.
    pub fn mark_done(&mut self, id: SubtaskId, result: impl Into<String>) -> bool {
        match self.subtasks.get_mut(&id) {
            Some(s) if !s.state.is_terminal() => {
                s.state = SubtaskState::Done;
                s.result = Some(result.into());
                s.assigned_to = None;
                true
            }
            _ => false,
        }
    }

    /// Record a failed attempt without giving up on the subtask.
    ///
    /// The subtask shows `failed` until its retry backoff elapses and
    /// [`Self::mark_retry`] returns it to `ready`; dependents are not
    /// touched.
    pub fn mark_attempt_failed(&mut self, id: SubtaskId, error: impl Into<String>) {
        if let Some(s) = self.subtasks.get_mut(&id) {
            if s.state == SubtaskState::InFlight {
                s.state = SubtaskState::Failed;
                s.error = Some(error.into());
                s.assigned_to = None;
            }
        }
    }

    /// Transition back to `ready` for a retry after a failed attempt.
    pub fn mark_retry(&mut self, id: SubtaskId) {
        if let Some(s) = self.subtasks.get_mut(&id) {
            if matches!(s.state, SubtaskState::InFlight | SubtaskState::Failed) {
                s.state = SubtaskState::Ready;
                s.assigned_to = None;
                s.error = None;
            }
        }
    }

    /// Mark a subtask failed and fail its dependents transitively.
    ///
    /// Returns the ids failed by this call (the subtask itself first).
    pub fn mark_failed(&mut self, id: SubtaskId, error: impl Into<String>) -> Vec<SubtaskId> {
        let mut failed = Vec::new();
        if let Some(s) = self.subtasks.get_mut(&id) {
            if s.state.is_terminal() {
                return failed;
            }
            s.state = SubtaskState::Failed;
            s.error = Some(error.into());
            s.assigned_to = None;
            failed.push(id);
        }

        // Transitive closure over dependents.
        let mut frontier = vec![id];
        while let Some(cause) = frontier.pop() {
            let dependents: Vec<SubtaskId> = self
                .subtasks
                .values()
                .filter(|s| !s.state.is_terminal() && s.deps.contains(&cause))
                .map(|s| s.id)
                .collect();
            for dep_id in dependents {
                if let Some(s) = self.subtasks.get_mut(&dep_id) {
                    s.state = SubtaskState::Failed;
                    s.error = Some(format!("dependency-failed: {cause}"));
                    failed.push(dep_id);
                    frontier.push(dep_id);
                }
            }
        }
        failed
    }

    /// Subtasks currently `in-flight` and assigned to the given worker.
    pub fn in_flight_of(&self, worker: &AgentId) -> Vec<SubtaskId> {
        self.subtasks
            .values()
            .filter(|s| s.state == SubtaskState::InFlight && s.assigned_to.as_ref() == Some(worker))
            .map(|s| s.id)
            .collect()
    }

    /// All subtasks have reached a terminal state.
    pub fn is_complete(&self) -> bool {
        self.subtasks.values().all(|s| s.state.is_terminal())
    }

    /// Any subtask failed (session-level failure per root propagation).
    pub fn any_failed(&self) -> bool {
        self.subtasks
            .values()
            .any(|s| s.state == SubtaskState::Failed)
    }

    /// Ids of failed subtasks in id order.
    pub fn failed_ids(&self) -> Vec<SubtaskId> {
        self.subtasks
            .values()
            .filter(|s| s.state == SubtaskState::Failed)
            .map(|s| s.id)
            .collect()
    }

    /// Pending-or-ready count per priority, for the fleet snapshot.
    pub fn pending_by_priority(&self) -> BTreeMap<i32, usize> {
        let mut counts = BTreeMap::new();
        for s in self.subtasks.values() {
            if matches!(s.state, SubtaskState::Pending | SubtaskState::Ready) {
                *counts.entry(s.priority).or_default() += 1;
            }
        }
        counts
    }

    /// Results of `done` subtasks in id order, with role annotations.
    pub fn results_in_order(&self) -> Vec<(SubtaskId, Option<Role>, &str)> {
        self.subtasks
            .values()
            .filter(|s| s.state == SubtaskState::Done)
            .filter_map(|s| {
                s.result
                    .as_deref()
                    .map(|r| (s.id, s.required_role, r))
            })
            .collect()
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
