// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subtask records and their state machine.

use crate::agent::AgentId;
use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Identifier of a subtask, unique within its session.
///
/// Numeric so that "subtask id ascending" tie-breaks in the ready queue are
/// the decomposition order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubtaskId(pub u32);

impl fmt::Display for SubtaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "st-{}", self.0)
    }
}

/// State of a subtask through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SubtaskState {
    Pending,
    Ready,
    InFlight,
    Done,
    Failed,
}

impl SubtaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubtaskState::Done | SubtaskState::Failed)
    }
}

impl fmt::Display for SubtaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SubtaskState::Pending => "pending",
            SubtaskState::Ready => "ready",
            SubtaskState::InFlight => "in-flight",
            SubtaskState::Done => "done",
            SubtaskState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A unit of work produced by decomposition.
///
/// Created by a decomposition step, mutated only by the scheduler (state
/// transitions) and its assigned worker (result/error), frozen on a terminal
/// state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    pub id: SubtaskId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_role: Option<Role>,
    /// Larger means sooner.
    pub priority: i32,
    /// Subtasks that must be `done` before this one becomes ready.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub deps: BTreeSet<SubtaskId>,
    /// Absolute deadline in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    pub state: SubtaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<AgentId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Dispatch attempts so far (first send counts as 1).
    #[serde(default)]
    pub attempts: u32,
}

impl Subtask {
    pub fn new(id: SubtaskId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: text.into(),
            required_role: None,
            priority: 0,
            deps: BTreeSet::new(),
            deadline_ms: None,
            state: SubtaskState::Pending,
            assigned_to: None,
            result: None,
            error: None,
            attempts: 0,
        }
    }
}

#[cfg(test)]
#[path = "subtask_tests.rs"]
mod tests;
