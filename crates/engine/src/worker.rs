// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker runtime.
//!
//! One long-lived task per worker: drain the inbox, build a role-tagged
//! prompt, call the LLM backend, reply with `response` or `error`. One
//! backend call is in flight at a time and is treated as non-interruptible;
//! cancellation and drain requests are observed between messages.

use crate::board::{FleetBoard, LifecycleCell};
use crate::bus::{BusError, DispatchBus};
use hive_adapters::{ArtifactWriter, BackendError, ChatMessage, LlmBackend};
use hive_core::{
    AgentId, AgentLifecycle, Clock, ControlSignal, HiveConfig, Message, MessageKind,
    MessagePayload, Role, SubtaskAssignment, SubtaskId,
};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often an idle worker wakes to check for drain/termination.
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Most recent peer results kept for mesh prompts.
const PEER_CONTEXT_LIMIT: usize = 4;

/// A single worker agent's event loop.
pub struct WorkerRuntime<B: LlmBackend, C: Clock> {
    id: AgentId,
    role: Role,
    model: String,
    inbox: mpsc::Receiver<Message>,
    bus: DispatchBus<C>,
    board: FleetBoard,
    lifecycle: LifecycleCell,
    artifact: Option<ArtifactWriter>,
    config: Arc<HiveConfig>,
    backend: B,
    clock: C,
    /// Processed (subtask, attempt) pairs; replayed duplicates are dropped.
    processed: HashSet<(SubtaskId, u32)>,
    /// Latest peer responses, newest last (mesh architecture).
    peer_context: VecDeque<(AgentId, String)>,
}

impl<B: LlmBackend, C: Clock> WorkerRuntime<B, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: AgentId,
        role: Role,
        model: String,
        inbox: mpsc::Receiver<Message>,
        bus: DispatchBus<C>,
        board: FleetBoard,
        lifecycle: LifecycleCell,
        artifact: Option<ArtifactWriter>,
        config: Arc<HiveConfig>,
        backend: B,
        clock: C,
    ) -> Self {
        Self {
            id,
            role,
            model,
            inbox,
            bus,
            board,
            lifecycle,
            artifact,
            config,
            backend,
            clock,
            processed: HashSet::new(),
            peer_context: VecDeque::new(),
        }
    }

    fn state(&self) -> AgentLifecycle {
        *self.lifecycle.lock()
    }

    /// The worker loop; returns when drained or terminated.
    pub async fn run(mut self) {
        info!(worker = %self.id, role = %self.role, "worker active");

        loop {
            match self.state() {
                AgentLifecycle::Terminated | AgentLifecycle::Failed => break,
                AgentLifecycle::Draining => {
                    // Finish whatever is already queued, then exit.
                    match self.inbox.try_recv() {
                        Ok(message) => self.handle(message).await,
                        Err(_) => break,
                    }
                    continue;
                }
                _ => {}
            }

            tokio::select! {
                maybe = self.inbox.recv() => {
                    match maybe {
                        Some(message) => self.handle(message).await,
                        None => break,
                    }
                }
                _ = tokio::time::sleep(IDLE_POLL) => {
                    // Wake to re-check lifecycle.
                }
            }
        }

        info!(worker = %self.id, "worker exiting");
    }

    async fn handle(&mut self, message: Message) {
        let seq = message.seq;
        match message.kind {
            MessageKind::Control => {
                if matches!(
                    message.payload,
                    MessagePayload::Control {
                        signal: ControlSignal::Shutdown
                    }
                ) {
                    let mut lifecycle = self.lifecycle.lock();
                    if lifecycle.can_transition(AgentLifecycle::Draining) {
                        *lifecycle = AgentLifecycle::Draining;
                    }
                }
            }
            MessageKind::Subtask => {
                let assignment = message.assignment().cloned();
                if let Some(assignment) = assignment {
                    self.handle_subtask(message, assignment).await;
                }
            }
            MessageKind::Response => {
                // Peer result sharing (mesh architecture).
                if let Some(text) = message.text() {
                    self.peer_context
                        .push_back((message.sender.clone(), text.to_string()));
                    while self.peer_context.len() > PEER_CONTEXT_LIMIT {
                        self.peer_context.pop_front();
                    }
                }
            }
            _ => {
                debug!(worker = %self.id, kind = %message.kind, "ignoring message");
            }
        }
        self.bus.ack(&self.id, seq);
    }

    async fn handle_subtask(&mut self, origin: Message, assignment: SubtaskAssignment) {
        let identity = (assignment.subtask_id, assignment.attempt);
        if self.processed.contains(&identity) {
            debug!(worker = %self.id, subtask = %assignment.subtask_id, "duplicate delivery dropped");
            return;
        }

        if self.state() == AgentLifecycle::Draining {
            self.reply_error(&origin, "worker-draining").await;
            return;
        }

        self.board.set_busy(&self.id, origin.clone());
        let outcome = self.call_backend(&assignment).await;
        self.processed.insert(identity);

        match outcome {
            Ok(text) => {
                // Explicit file-save directives are materialized before the
                // reply; a rejected write fails the subtask.
                if let Some(writer) = &self.artifact {
                    if let Err(e) = writer.maybe_save(&assignment.text, &text) {
                        warn!(worker = %self.id, error = %e, "artifact write rejected");
                        self.reply_error(&origin, format!("artifact: {e}")).await;
                        self.board.set_idle(&self.id);
                        return;
                    }
                }

                for peer in &assignment.peers {
                    let mut share =
                        Message::response(&origin, self.id.clone(), text.clone(), self.clock.epoch_ms());
                    share.receiver = peer.clone();
                    if let Err(e) = self.bus.send(share).await {
                        debug!(peer = %peer, error = %e, "peer share failed");
                    }
                }

                let reply = Message::response(&origin, self.id.clone(), text, self.clock.epoch_ms());
                self.deliver(reply).await;
            }
            Err(e) => {
                self.reply_error(&origin, e.to_string()).await;
            }
        }
        self.board.set_idle(&self.id);
    }

    /// Call the backend with per-call timeout and jittered transient retries.
    async fn call_backend(&self, assignment: &SubtaskAssignment) -> Result<String, BackendError> {
        let messages = self.build_prompt(assignment);
        let mut last_err = BackendError::Transient("no attempt made".to_string());

        for attempt in 0..=self.config.call_retries {
            if attempt > 0 {
                let jitter = rand::rng().random_range(0..250);
                let backoff = self.config.retry_backoff_ms * attempt as u64 + jitter;
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.backend.chat(&self.model, &messages);
            match tokio::time::timeout(self.config.call_timeout(), call).await {
                Ok(Ok(text)) => return Ok(text),
                Ok(Err(e)) if e.is_retryable() => {
                    debug!(worker = %self.id, attempt, error = %e, "transient backend failure");
                    last_err = e;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    last_err = BackendError::Timeout(self.config.call_timeout());
                }
            }
        }
        Err(last_err)
    }

    /// Role-tagged prompt: the role's perspective, peer findings in mesh
    /// mode, then the subtask text.
    fn build_prompt(&self, assignment: &SubtaskAssignment) -> Vec<ChatMessage> {
        let role = assignment.role.unwrap_or(self.role);
        let mut system = role.perspective().to_string();

        if !assignment.peers.is_empty() && !self.peer_context.is_empty() {
            system.push_str("\n\nFindings from peer agents so far:");
            for (peer, text) in &self.peer_context {
                system.push_str(&format!("\n- {peer}: {text}"));
            }
        }

        vec![ChatMessage::system(system), ChatMessage::user(assignment.text.clone())]
    }

    async fn reply_error(&self, origin: &Message, reason: impl Into<String>) {
        let reply = Message::error(origin, self.id.clone(), reason, self.clock.epoch_ms());
        self.deliver(reply).await;
    }

    /// Send a reply, riding out short bursts of coordinator backpressure.
    ///
    /// Each attempt logs a fresh copy; receivers dedupe by message identity,
    /// so redundant deliveries collapse to one state transition.
    async fn deliver(&self, message: Message) {
        for attempt in 0..3 {
            match self.bus.send(message.clone()).await {
                Ok(_) => return,
                Err(BusError::Backpressure(_)) if attempt < 2 => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "reply delivery failed");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
