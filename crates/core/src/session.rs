// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session records.
//!
//! A session is the top-level container for one user task: its subtask
//! graph, the agents spawned for it, and the aggregated result. Sessions are
//! created on task submission, mutated by the coordinator, and sealed
//! (immutable) on reaching a terminal status.

use crate::agent::{AgentId, AgentRecord};
use crate::graph::SubtaskGraph;
use crate::message::CorrelationId;
use crate::subtask::SubtaskId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

crate::define_id! {
    /// Unique identifier for a session.
    pub struct SessionId;
}

/// Coordination topology selected at session creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Hierarchical,
    Centralized,
    Mesh,
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Architecture::Hierarchical => "hierarchical",
            Architecture::Centralized => "centralized",
            Architecture::Mesh => "mesh",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Architecture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hierarchical" => Ok(Architecture::Hierarchical),
            "centralized" => Ok(Architecture::Centralized),
            "mesh" => Ok(Architecture::Mesh),
            other => Err(format!("unknown architecture: {other}")),
        }
    }
}

/// Session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Wait/execution timing summary attached at seal time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingSummary {
    pub subtasks: usize,
    pub mean_wait_ms: u64,
    pub max_wait_ms: u64,
    pub elapsed_ms: u64,
}

/// The top-level container for one user task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub task: String,
    pub architecture: Architecture,
    pub status: SessionStatus,
    pub graph: SubtaskGraph,
    /// Agents spawned for this session, by id.
    #[serde(default)]
    pub agents: BTreeMap<AgentId, AgentRecord>,
    /// Correlation id → subtask id index for reply routing.
    #[serde(default)]
    pub correlations: HashMap<CorrelationId, SubtaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    /// First failure summary, set when the session fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// CAS version; bumped by every store update.
    #[serde(default)]
    pub version: u64,
    pub created_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<TimingSummary>,
}

impl Session {
    pub fn new(
        id: SessionId,
        task: impl Into<String>,
        architecture: Architecture,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id,
            task: task.into(),
            architecture,
            status: SessionStatus::Running,
            graph: SubtaskGraph::new(),
            agents: BTreeMap::new(),
            correlations: HashMap::new(),
            result: None,
            failure: None,
            warnings: Vec::new(),
            version: 0,
            created_at_ms,
            sealed_at_ms: None,
            timing: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed_at_ms.is_some()
    }

    /// Human-readable error summary: first failure plus failed subtask ids.
    pub fn error_summary(&self) -> Option<String> {
        let failed = self.graph.failed_ids();
        if failed.is_empty() && self.failure.is_none() {
            return None;
        }
        let ids: Vec<String> = failed.iter().map(|id| id.to_string()).collect();
        let first = self.failure.as_deref().unwrap_or("subtask failure");
        Some(format!("{first} (failed: [{}])", ids.join(", ")))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
