// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch bus: in-process routing from agent id to bounded inbox.
//!
//! Every send appends to the message log first, then enqueues, so the log
//! order is the canonical order and inbox contents can be reconstructed
//! after a restart by replaying above each receiver's watermark. A send to a
//! missing or terminated receiver synthesizes a dead-letter `error` message
//! back to the sender with the correlation preserved.
//!
//! Ordering guarantee: messages from a single sender to a single receiver
//! are delivered in send order; nothing is promised across pairs.

use crate::board::LifecycleCell;
use hive_core::{AgentId, Clock, ControlSignal, Message, MessageKind};
use hive_storage::{LogError, MessageLog, WatermarkError, WatermarkTable};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

/// Errors from bus operations
#[derive(Debug, Error)]
pub enum BusError {
    #[error("duplicate identity: {0}")]
    DuplicateIdentity(AgentId),
    #[error("inbox full: {0}")]
    Backpressure(AgentId),
    #[error("log error: {0}")]
    Log(#[from] LogError),
    #[error("watermark error: {0}")]
    Watermark(#[from] WatermarkError),
}

/// Prefix dead-letter reasons carry in their payload text.
pub const DEAD_LETTER_PREFIX: &str = "dead-letter:";

struct Registration {
    tx: mpsc::Sender<Message>,
    lifecycle: LifecycleCell,
}

/// In-process router over bounded inboxes, backed by the message log.
pub struct DispatchBus<C: Clock> {
    log: Arc<Mutex<MessageLog>>,
    watermarks: Arc<Mutex<WatermarkTable>>,
    registrations: Arc<Mutex<HashMap<AgentId, Registration>>>,
    inbox_capacity: usize,
    send_timeout: Duration,
    clock: C,
}

impl<C: Clock> Clone for DispatchBus<C> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
            watermarks: Arc::clone(&self.watermarks),
            registrations: Arc::clone(&self.registrations),
            inbox_capacity: self.inbox_capacity,
            send_timeout: self.send_timeout,
            clock: self.clock.clone(),
        }
    }
}

impl<C: Clock> DispatchBus<C> {
    pub fn new(
        log: Arc<Mutex<MessageLog>>,
        watermarks: Arc<Mutex<WatermarkTable>>,
        inbox_capacity: usize,
        send_timeout: Duration,
        clock: C,
    ) -> Self {
        Self {
            log,
            watermarks,
            registrations: Arc::new(Mutex::new(HashMap::new())),
            inbox_capacity,
            send_timeout,
            clock,
        }
    }

    /// Register an agent and hand back its inbox.
    ///
    /// Idempotent in the sense that a registration whose prior owner is
    /// terminated is replaced; a live duplicate is `DuplicateIdentity`.
    pub fn register(
        &self,
        agent_id: AgentId,
        lifecycle: LifecycleCell,
    ) -> Result<mpsc::Receiver<Message>, BusError> {
        let mut registrations = self.registrations.lock();

        if let Some(existing) = registrations.get(&agent_id) {
            if !existing.lifecycle.lock().is_terminal() {
                return Err(BusError::DuplicateIdentity(agent_id));
            }
        }

        let (tx, rx) = mpsc::channel(self.inbox_capacity);
        registrations.insert(agent_id, Registration { tx, lifecycle });
        Ok(rx)
    }

    /// Remove an agent's registration and watermark.
    pub fn deregister(&self, agent_id: &AgentId) {
        self.registrations.lock().remove(agent_id);
        self.watermarks.lock().remove(agent_id);
    }

    /// Agent ids registered right now.
    pub fn members(&self) -> Vec<AgentId> {
        let mut members: Vec<AgentId> = self.registrations.lock().keys().cloned().collect();
        members.sort();
        members
    }

    pub fn is_registered(&self, agent_id: &AgentId) -> bool {
        self.registrations.lock().contains_key(agent_id)
    }

    /// Log a message durably, then enqueue it to the receiver's inbox.
    ///
    /// Returns the stamped message on normal delivery. An unreachable
    /// receiver produces `Ok(None)` after a dead-letter error is routed to
    /// the sender; a full inbox past the timeout is `Backpressure` (the
    /// logged copy is redelivered on replay, and receivers dedupe on message
    /// identity).
    pub async fn send(&self, message: Message) -> Result<Option<Message>, BusError> {
        let receiver = message.receiver.clone();
        let target = {
            let registrations = self.registrations.lock();
            registrations.get(&receiver).map(|r| {
                (
                    r.tx.clone(),
                    *r.lifecycle.lock(),
                )
            })
        };

        let deliverable = match &target {
            Some((_, lifecycle)) => !lifecycle.is_terminal(),
            None => false,
        };

        if !deliverable {
            debug!(receiver = %receiver, "send target unreachable, dead-lettering");
            return self.dead_letter(message).await.map(|_| None);
        }

        let stamped = {
            let mut log = self.log.lock();
            log.append(message)?
        };

        let (tx, _) = match target {
            Some(t) => t,
            None => return Ok(None),
        };
        match tx
            .send_timeout(stamped.clone(), self.send_timeout)
            .await
        {
            Ok(()) => Ok(Some(stamped)),
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(receiver = %receiver, "inbox full, backpressure");
                Err(BusError::Backpressure(receiver))
            }
            Err(SendTimeoutError::Closed(_)) => {
                // Receiver dropped its inbox between lookup and enqueue.
                self.dead_letter(stamped).await.map(|_| None)
            }
        }
    }

    /// Synthesize a dead-letter `error` back to the sender of `message`.
    ///
    /// The dead letter is logged and enqueued like any other message, with
    /// the original correlation preserved so the sender can fail the right
    /// subtask.
    async fn dead_letter(&self, message: Message) -> Result<(), BusError> {
        // Replies to an unreachable agent are dropped rather than bounced
        // back and forth forever.
        if message.kind == MessageKind::Error || message.kind == MessageKind::Control {
            return Ok(());
        }

        let mut dead = Message::error(
            &message,
            message.receiver.clone(),
            format!("{DEAD_LETTER_PREFIX} {} unreachable", message.receiver),
            self.clock.epoch_ms(),
        );
        dead.receiver = message.sender.clone();
        dead.parent = None;

        let stamped = {
            let mut log = self.log.lock();
            log.append(dead)?
        };

        let tx = {
            let registrations = self.registrations.lock();
            registrations.get(&stamped.receiver).map(|r| r.tx.clone())
        };
        if let Some(tx) = tx {
            let _ = tx.send_timeout(stamped, self.send_timeout).await;
        }
        Ok(())
    }

    /// Enqueue one `control` copy per registered receiver.
    ///
    /// Membership is captured at the instant of the call.
    pub async fn broadcast(
        &self,
        session_id: hive_core::SessionId,
        sender: AgentId,
        signal: ControlSignal,
    ) -> Result<(), BusError> {
        let members = self.members();
        for receiver in members {
            if receiver == sender {
                continue;
            }
            let message = Message::control(
                session_id.clone(),
                sender.clone(),
                receiver,
                signal.clone(),
                self.clock.epoch_ms(),
            );
            if let Err(e) = self.send(message).await {
                warn!(error = %e, "broadcast delivery failed");
            }
        }
        Ok(())
    }

    /// Advance a receiver's processed watermark.
    pub fn ack(&self, agent_id: &AgentId, seq: u64) {
        self.watermarks.lock().advance(agent_id, seq);
    }

    /// Rebuild inboxes by replaying the log above each receiver's watermark.
    ///
    /// Call after all survivors are registered again. Delivery failures are
    /// logged and skipped; receivers dedupe replayed work.
    pub async fn replay(&self) -> Result<usize, BusError> {
        let members = self.members();
        let mut delivered = 0usize;

        for receiver in members {
            let from = {
                let watermarks = self.watermarks.lock();
                watermarks.get(&receiver)
            };
            let pending = {
                let mut log = self.log.lock();
                log.flush()?;
                log.read(
                    from + 1,
                    0,
                    &hive_storage::MessageFilter::receiver(receiver.clone()),
                )?
            };

            let tx = {
                let registrations = self.registrations.lock();
                registrations.get(&receiver).map(|r| r.tx.clone())
            };
            let Some(tx) = tx else { continue };
            for message in pending {
                if tx
                    .send_timeout(message, self.send_timeout)
                    .await
                    .is_ok()
                {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }

    /// Flush the log and persist dirty watermarks.
    pub fn flush(&self) -> Result<(), BusError> {
        {
            let mut log = self.log.lock();
            log.flush()?;
        }
        {
            let mut watermarks = self.watermarks.lock();
            watermarks.save_if_dirty()?;
        }
        Ok(())
    }

    /// Whether the log has buffered entries wanting a flush.
    pub fn needs_flush(&self) -> bool {
        self.log.lock().needs_flush()
    }

    /// Shared log handle (for reads and pruning).
    pub fn log(&self) -> Arc<Mutex<MessageLog>> {
        Arc::clone(&self.log)
    }

    /// Shared watermark handle.
    pub fn watermarks(&self) -> Arc<Mutex<WatermarkTable>> {
        Arc::clone(&self.watermarks)
    }
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
