// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent identity and lifecycle.
//!
//! An agent is a long-lived unit with an identity, a role and an inbox.
//! Lifecycle transitions are monotone except for `active ↔ draining`;
//! `terminated` and `failed` are terminal.

use crate::role::Role;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Stable string identifier for an agent, unique within a session
    /// (`queen`, `subqueen-0`, `worker-7`).
    pub struct AgentId;
}

impl AgentId {
    /// The top-level coordinator of a session.
    pub fn queen() -> Self {
        Self::new("queen")
    }

    /// The n-th sub-coordinator of a hierarchical session.
    pub fn subqueen(n: usize) -> Self {
        Self::new(format!("subqueen-{n}"))
    }

    /// The n-th worker spawned by the agent manager.
    pub fn worker(n: u64) -> Self {
        Self::new(format!("worker-{n}"))
    }
}

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLifecycle {
    Creating,
    Registering,
    Active,
    Draining,
    Terminated,
    Failed,
}

impl AgentLifecycle {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentLifecycle::Terminated | AgentLifecycle::Failed)
    }

    /// Whether the transition `self → next` is legal.
    ///
    /// Forward-only, with two exceptions: `active ↔ draining` may flip in
    /// both directions, and `failed` is reachable from any non-terminal
    /// state. `active → terminated` covers forced termination.
    pub fn can_transition(self, next: AgentLifecycle) -> bool {
        use AgentLifecycle::*;
        match (self, next) {
            (Creating, Registering) => true,
            (Registering, Active) => true,
            (Active, Draining) => true,
            (Active, Terminated) => true,
            (Draining, Active) => true,
            (Draining, Terminated) => true,
            (s, Failed) if !s.is_terminal() => true,
            _ => false,
        }
    }
}

impl fmt::Display for AgentLifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentLifecycle::Creating => "creating",
            AgentLifecycle::Registering => "registering",
            AgentLifecycle::Active => "active",
            AgentLifecycle::Draining => "draining",
            AgentLifecycle::Terminated => "terminated",
            AgentLifecycle::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Per-session agent record persisted in the session store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub role: Role,
    pub state: AgentLifecycle,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated_at_ms: Option<u64>,
}

impl AgentRecord {
    pub fn new(id: AgentId, role: Role, created_at_ms: u64) -> Self {
        Self {
            id,
            role,
            state: AgentLifecycle::Creating,
            created_at_ms,
            terminated_at_ms: None,
        }
    }
}

#[cfg(test)]
#[path = "agent_tests.rs"]
mod tests;
