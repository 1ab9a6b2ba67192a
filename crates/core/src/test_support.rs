// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test helpers for use across crates.
//!
//! Gated behind `#[cfg(any(test, feature = "test-support"))]`.

use crate::{
    Architecture, CorrelationId, Message, Session, SessionId, SubtaskAssignment, SubtaskId,
};
use std::collections::BTreeSet;

// ── Record factory functions ────────────────────────────────────────────────

pub fn test_session(id: &str, task: &str) -> Session {
    Session::new(
        SessionId::new(id),
        task,
        Architecture::Centralized,
        1_000_000,
    )
}

pub fn test_assignment(subtask_id: u32, text: &str) -> SubtaskAssignment {
    SubtaskAssignment {
        subtask_id: SubtaskId(subtask_id),
        text: text.to_string(),
        role: None,
        priority: 0,
        deadline_ms: None,
        attempt: 1,
        peers: Vec::new(),
    }
}

pub fn test_subtask_message(
    session: &str,
    sender: &str,
    receiver: &str,
    subtask_id: u32,
) -> Message {
    Message::subtask(
        SessionId::new(session),
        sender.into(),
        receiver.into(),
        CorrelationId::new(format!("corr-{subtask_id}")),
        test_assignment(subtask_id, "do the thing"),
        1_000_000,
    )
}

pub fn deps(ids: &[u32]) -> BTreeSet<SubtaskId> {
    ids.iter().map(|&n| SubtaskId(n)).collect()
}
