// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inter-agent messages.
//!
//! Messages are immutable, append-only records. The sequence number is
//! assigned by the message log at append time and is the canonical global
//! order; a reply carries the correlation id of the message that opened the
//! request chain and the sequence of the message it answers.

use crate::agent::AgentId;
use crate::role::Role;
use crate::session::SessionId;
use crate::subtask::SubtaskId;
use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Identifier shared by all messages belonging to one request/response
    /// chain.
    pub struct CorrelationId;
}

/// Type tag of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Task,
    Subtask,
    Response,
    Error,
    Control,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MessageKind::Task => "task",
            MessageKind::Subtask => "subtask",
            MessageKind::Response => "response",
            MessageKind::Error => "error",
            MessageKind::Control => "control",
        };
        write!(f, "{s}")
    }
}

/// Control signals carried by `control` messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Stop accepting new work, finish what is in flight, then exit.
    Shutdown,
}

/// The work order carried by a `subtask` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskAssignment {
    pub subtask_id: SubtaskId,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
    /// Which dispatch attempt this is (1-based). Workers use it to
    /// deduplicate redelivery after log replay.
    pub attempt: u32,
    /// Peer workers to share the response with (mesh architecture only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<AgentId>,
}

/// Message payload.
///
/// Serializes with `{"type": "payload:kind", ...fields}` tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePayload {
    #[serde(rename = "payload:text")]
    Text { text: String },

    #[serde(rename = "payload:subtask")]
    Subtask { subtask: SubtaskAssignment },

    #[serde(rename = "payload:control")]
    Control { signal: ControlSignal },
}

/// An immutable inter-agent message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Monotone sequence assigned by the log; 0 before append.
    #[serde(default)]
    pub seq: u64,
    /// Session boundary carried in metadata; the log itself is
    /// process-scoped and shared by all sessions.
    pub session_id: SessionId,
    pub sender: AgentId,
    pub receiver: AgentId,
    pub kind: MessageKind,
    pub correlation: CorrelationId,
    /// Sequence of the message this one answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
    pub payload: MessagePayload,
    pub created_at_ms: u64,
}

impl Message {
    /// A `task` message opening a new correlation chain.
    pub fn task(
        session_id: SessionId,
        sender: AgentId,
        receiver: AgentId,
        correlation: CorrelationId,
        text: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            seq: 0,
            session_id,
            sender,
            receiver,
            kind: MessageKind::Task,
            correlation,
            parent: None,
            payload: MessagePayload::Text { text: text.into() },
            created_at_ms,
        }
    }

    /// A `subtask` work order opening a new correlation chain.
    pub fn subtask(
        session_id: SessionId,
        sender: AgentId,
        receiver: AgentId,
        correlation: CorrelationId,
        assignment: SubtaskAssignment,
        created_at_ms: u64,
    ) -> Self {
        Self {
            seq: 0,
            session_id,
            sender,
            receiver,
            kind: MessageKind::Subtask,
            correlation,
            parent: None,
            payload: MessagePayload::Subtask {
                subtask: assignment,
            },
            created_at_ms,
        }
    }

    /// A `response` answering `origin`, preserving its correlation.
    pub fn response(origin: &Message, sender: AgentId, text: impl Into<String>, created_at_ms: u64) -> Self {
        Self {
            seq: 0,
            session_id: origin.session_id.clone(),
            sender,
            receiver: origin.sender.clone(),
            kind: MessageKind::Response,
            correlation: origin.correlation.clone(),
            parent: Some(origin.seq),
            payload: MessagePayload::Text { text: text.into() },
            created_at_ms,
        }
    }

    /// An `error` answering `origin`, preserving its correlation.
    pub fn error(origin: &Message, sender: AgentId, reason: impl Into<String>, created_at_ms: u64) -> Self {
        Self {
            seq: 0,
            session_id: origin.session_id.clone(),
            sender,
            receiver: origin.sender.clone(),
            kind: MessageKind::Error,
            correlation: origin.correlation.clone(),
            parent: Some(origin.seq),
            payload: MessagePayload::Text {
                text: reason.into(),
            },
            created_at_ms,
        }
    }

    /// A `control` message.
    pub fn control(
        session_id: SessionId,
        sender: AgentId,
        receiver: AgentId,
        signal: ControlSignal,
        created_at_ms: u64,
    ) -> Self {
        Self {
            seq: 0,
            session_id,
            sender,
            receiver,
            kind: MessageKind::Control,
            correlation: CorrelationId::new("control"),
            parent: None,
            payload: MessagePayload::Control { signal },
            created_at_ms,
        }
    }

    /// The subtask assignment, if this is a `subtask` message.
    pub fn assignment(&self) -> Option<&SubtaskAssignment> {
        match &self.payload {
            MessagePayload::Subtask { subtask } => Some(subtask),
            _ => None,
        }
    }

    /// The payload text, if this is a text-carrying message.
    pub fn text(&self) -> Option<&str> {
        match &self.payload {
            MessagePayload::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
