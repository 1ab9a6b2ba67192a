// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent manager: applies scale decisions and owns worker lifecycles.
//!
//! Workers walk `creating → registering → active`; drain lets in-flight
//! work finish before `terminated`, force-terminate is immediate and
//! surfaces the victim's in-flight subtask as a `worker-terminated` error.
//! Lifecycle hooks fire on every transition for observers.

use crate::board::{FleetBoard, LifecycleCell};
use crate::bus::{BusError, DispatchBus};
use crate::worker::WorkerRuntime;
use hive_adapters::{ArtifactWriter, LlmBackend};
use hive_core::{AgentId, AgentLifecycle, Clock, HiveConfig, Message, Role};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Observer invoked on every lifecycle transition.
pub type LifecycleHook = Arc<dyn Fn(&AgentId, AgentLifecycle) + Send + Sync>;

struct ManagedWorker {
    lifecycle: LifecycleCell,
    task: JoinHandle<()>,
}

/// Creates and retires workers.
pub struct AgentManager<B: LlmBackend, C: Clock> {
    bus: DispatchBus<C>,
    board: FleetBoard,
    backend: B,
    config: Arc<HiveConfig>,
    clock: C,
    next_worker: Arc<AtomicU64>,
    workers: Arc<Mutex<HashMap<AgentId, ManagedWorker>>>,
    hooks: Arc<Mutex<Vec<LifecycleHook>>>,
}

impl<B: LlmBackend, C: Clock> Clone for AgentManager<B, C> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            board: self.board.clone(),
            backend: self.backend.clone(),
            config: Arc::clone(&self.config),
            clock: self.clock.clone(),
            next_worker: Arc::clone(&self.next_worker),
            workers: Arc::clone(&self.workers),
            hooks: Arc::clone(&self.hooks),
        }
    }
}

impl<B: LlmBackend, C: Clock> AgentManager<B, C> {
    pub fn new(
        bus: DispatchBus<C>,
        board: FleetBoard,
        backend: B,
        config: Arc<HiveConfig>,
        clock: C,
    ) -> Self {
        Self {
            bus,
            board,
            backend,
            config,
            clock,
            next_worker: Arc::new(AtomicU64::new(0)),
            workers: Arc::new(Mutex::new(HashMap::new())),
            hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a lifecycle observer.
    pub fn add_hook(&self, hook: LifecycleHook) {
        self.hooks.lock().push(hook);
    }

    fn transition(&self, id: &AgentId, cell: &LifecycleCell, next: AgentLifecycle) {
        {
            let mut lifecycle = cell.lock();
            if !lifecycle.can_transition(next) {
                warn!(agent = %id, from = %lifecycle, to = %next, "illegal lifecycle transition skipped");
                return;
            }
            *lifecycle = next;
        }
        for hook in self.hooks.lock().iter() {
            hook(id, next);
        }
    }

    /// Create one worker with the given role.
    ///
    /// A duplicate-identity collision on the bus is retried with a fresh id;
    /// the collision itself is a bug or a stale registration and gets
    /// logged.
    pub fn create(&self, role: Role) -> Result<AgentId, BusError> {
        let mut last_err = None;
        for _ in 0..3 {
            let id = AgentId::worker(self.next_worker.fetch_add(1, Ordering::SeqCst));
            let cell: LifecycleCell = Arc::new(Mutex::new(AgentLifecycle::Creating));

            self.transition(&id, &cell, AgentLifecycle::Registering);
            let inbox = match self.bus.register(id.clone(), Arc::clone(&cell)) {
                Ok(inbox) => inbox,
                Err(BusError::DuplicateIdentity(dup)) => {
                    warn!(agent = %dup, "duplicate identity, retrying with fresh id");
                    last_err = Some(BusError::DuplicateIdentity(dup));
                    continue;
                }
                Err(e) => return Err(e),
            };

            self.board.insert(id.clone(), role, Arc::clone(&cell));

            let artifact = self
                .config
                .project_folder
                .as_ref()
                .map(ArtifactWriter::new);
            let runtime = WorkerRuntime::new(
                id.clone(),
                role,
                self.config.model.clone(),
                inbox,
                self.bus.clone(),
                self.board.clone(),
                Arc::clone(&cell),
                artifact,
                Arc::clone(&self.config),
                self.backend.clone(),
                self.clock.clone(),
            );

            let manager = self.clone();
            let worker_id = id.clone();
            let worker_cell = Arc::clone(&cell);
            let task = tokio::spawn(async move {
                runtime.run().await;
                manager.finalize(&worker_id, &worker_cell);
            });

            self.workers.lock().insert(
                id.clone(),
                ManagedWorker {
                    lifecycle: cell.clone(),
                    task,
                },
            );
            self.transition(&id, &cell, AgentLifecycle::Active);
            info!(agent = %id, role = %role, "worker created");
            return Ok(id);
        }
        Err(last_err.unwrap_or(BusError::DuplicateIdentity(AgentId::new("worker-?"))))
    }

    /// Create a batch of workers, cycling roles.
    ///
    /// Partial failure is tolerated: successfully created workers remain and
    /// failures are reported without aborting the batch.
    pub fn create_batch(&self, count: usize, roles: &[Role]) -> Vec<AgentId> {
        let mut created = Vec::new();
        for i in 0..count {
            let role = roles
                .get(i % roles.len().max(1))
                .copied()
                .unwrap_or(Role::Generic);
            match self.create(role) {
                Ok(id) => created.push(id),
                Err(e) => warn!(error = %e, "worker creation failed in batch"),
            }
        }
        created
    }

    /// Begin draining a worker: no new subtasks, in-flight work completes.
    pub fn drain(&self, id: &AgentId) {
        let cell = {
            let workers = self.workers.lock();
            workers.get(id).map(|w| Arc::clone(&w.lifecycle))
        };
        if let Some(cell) = cell {
            self.transition(id, &cell, AgentLifecycle::Draining);
        }
    }

    /// Terminate a worker.
    ///
    /// With `force`, the task is aborted and any in-flight subtask is
    /// surfaced to its coordinator as a `worker-terminated` error; without
    /// it this is drain.
    pub async fn terminate(&self, id: &AgentId, force: bool) {
        if !force {
            self.drain(id);
            return;
        }

        let entry = self.workers.lock().remove(id);
        let Some(entry) = entry else { return };

        self.transition(id, &entry.lifecycle, AgentLifecycle::Terminated);
        entry.task.abort();

        // The aborted worker can no longer report its in-flight subtask;
        // synthesize the failure on its behalf.
        if let Some(origin) = self.board.current_work(id) {
            let error = Message::error(
                &origin,
                id.clone(),
                "worker-terminated",
                self.clock.epoch_ms(),
            );
            if let Err(e) = self.bus.send(error).await {
                warn!(agent = %id, error = %e, "failed to surface worker-terminated");
            }
        }

        self.board.remove(id);
        self.bus.deregister(id);
        info!(agent = %id, "worker terminated");
    }

    /// Cleanup run by the worker task itself once its loop exits.
    fn finalize(&self, id: &AgentId, cell: &LifecycleCell) {
        self.transition(id, cell, AgentLifecycle::Terminated);
        self.board.remove(id);
        self.bus.deregister(id);
        self.workers.lock().remove(id);
        info!(agent = %id, "worker drained");
    }

    /// Drain every worker and wait up to the grace period, then force.
    pub async fn shutdown(&self) {
        let ids: Vec<AgentId> = self.workers.lock().keys().cloned().collect();
        for id in &ids {
            self.drain(id);
        }

        let deadline = tokio::time::Instant::now() + self.config.grace_period();
        loop {
            if self.workers.lock().is_empty() {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }

        let stragglers: Vec<AgentId> = self.workers.lock().keys().cloned().collect();
        for id in stragglers {
            warn!(agent = %id, "force-terminating straggler");
            self.terminate(&id, true).await;
        }
    }

    /// Live managed worker count (any non-terminal state).
    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    /// Invariant check: active workers equal registered bus members minus
    /// draining/terminated agents.
    pub fn check_membership_invariant(&self) -> bool {
        let registered = self.bus.members();
        let non_worker = registered
            .iter()
            .filter(|id| !id.as_str().starts_with("worker-"))
            .count();
        let draining_or_terminal = {
            let workers = self.workers.lock();
            workers
                .values()
                .filter(|w| {
                    let state = *w.lifecycle.lock();
                    state == AgentLifecycle::Draining || state.is_terminal()
                })
                .count()
        };
        self.board.active_count() == registered.len() - non_worker - draining_or_terminal
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
