// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-level runtime.
//!
//! Owns the durable state files, the dispatch bus, the fleet and the
//! autoscaler, and drives sessions to completion. On startup, non-terminal
//! sessions from a previous process are re-activated before new work is
//! accepted: pending and ready subtasks replay as-is and orphaned in-flight
//! subtasks return to ready.

use crate::autoscaler::Autoscaler;
use crate::bus::DispatchBus;
use crate::coordinator::Coordinator;
use crate::ctx::EngineCtx;
use crate::manager::AgentManager;
use crate::{FleetBoard, RuntimeError};
use hive_adapters::{GpuMonitor, LlmBackend};
use hive_core::{
    AgentRecord, Clock, HiveConfig, IdGen, Role, Session, SessionId, SessionStatus, UuidIdGen,
};
use hive_storage::{MessageLog, SessionStore, WatermarkTable};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Flush cadence for group commit (~10ms durability window).
const FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(10);

/// Well-known file names inside the state directory.
pub struct StatePaths {
    pub state_dir: PathBuf,
}

impl StatePaths {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn messages(&self) -> PathBuf {
        self.state_dir.join("messages.log")
    }

    pub fn watermarks(&self) -> PathBuf {
        self.state_dir.join("watermarks.json")
    }

    pub fn sessions(&self) -> PathBuf {
        self.state_dir.join("sessions.snapshot")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join("hive.lock")
    }
}

/// The single-process orchestration runtime.
pub struct HiveRuntime<B: LlmBackend, C: Clock> {
    ctx: EngineCtx<B, C>,
    manager: AgentManager<B, C>,
    gpu: Arc<GpuMonitor<C>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    queue_tx: watch::Sender<BTreeMap<i32, usize>>,
    queue_rx: watch::Receiver<BTreeMap<i32, usize>>,
    autoscaler_stop: Mutex<Option<mpsc::Sender<()>>>,
    flush_started: AtomicBool,
    ids: UuidIdGen,
}

impl<B: LlmBackend, C: Clock> HiveRuntime<B, C> {
    /// Open (or create) the durable state and assemble the engine.
    pub fn open(
        paths: &StatePaths,
        backend: B,
        gpu: Arc<GpuMonitor<C>>,
        config: HiveConfig,
        clock: C,
    ) -> Result<Self, RuntimeError> {
        let log = Arc::new(Mutex::new(MessageLog::open(&paths.messages())?));
        let watermarks = Arc::new(Mutex::new(WatermarkTable::load(&paths.watermarks())?));
        let store = Arc::new(Mutex::new(SessionStore::open(&paths.sessions())?));

        let config = Arc::new(config);
        let bus = DispatchBus::new(
            log,
            watermarks,
            config.inbox_capacity,
            config.send_timeout(),
            clock.clone(),
        );
        let board = FleetBoard::new();
        let manager = AgentManager::new(
            bus.clone(),
            board.clone(),
            backend.clone(),
            Arc::clone(&config),
            clock.clone(),
        );

        let ctx = EngineCtx {
            bus,
            store,
            board,
            backend,
            config,
            clock,
        };

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (queue_tx, queue_rx) = watch::channel(BTreeMap::new());

        Ok(Self {
            ctx,
            manager,
            gpu,
            cancel_tx,
            cancel_rx,
            queue_tx,
            queue_rx,
            autoscaler_stop: Mutex::new(None),
            flush_started: AtomicBool::new(false),
            ids: UuidIdGen,
        })
    }

    pub fn ctx(&self) -> &EngineCtx<B, C> {
        &self.ctx
    }

    pub fn manager(&self) -> &AgentManager<B, C> {
        &self.manager
    }

    /// Request cancellation of the running session.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Spawn the group-commit flush task once.
    fn ensure_flush_task(&self) {
        if self.flush_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let bus = self.ctx.bus.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
            loop {
                ticker.tick().await;
                if bus.needs_flush() {
                    if let Err(e) = bus.flush() {
                        tracing::error!(error = %e, "flush failed");
                    }
                }
            }
        });
    }

    /// Grow the fleet to the configured worker count, cycling roles.
    ///
    /// A zero-worker configuration is clamped to one; a session could never
    /// finish otherwise.
    fn ensure_fleet(&self, session: Option<&mut Session>) {
        let want = self.ctx.config.workers.max(1);
        let have = self.ctx.board.active_count();
        if have >= want {
            return;
        }
        let created = self.manager.create_batch(want - have, &Role::all());

        if let Some(session) = session {
            let now_ms = self.ctx.clock.epoch_ms();
            for id in &created {
                let role = self
                    .ctx
                    .board
                    .idle_workers()
                    .iter()
                    .find(|(worker, _)| worker == id)
                    .map(|(_, role)| *role)
                    .unwrap_or(Role::Generic);
                let mut record = AgentRecord::new(id.clone(), role, now_ms);
                record.state = hive_core::AgentLifecycle::Active;
                session.agents.insert(id.clone(), record);
            }
        }
    }

    /// Start the autoscaler loop when configured.
    fn ensure_autoscaler(&self) {
        let Some(autoscale) = self.ctx.config.autoscale.clone() else {
            return;
        };
        let mut slot = self.autoscaler_stop.lock();
        if slot.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let autoscaler = Autoscaler::new(
            self.ctx.board.clone(),
            self.manager.clone(),
            Arc::clone(&self.gpu),
            autoscale,
            self.ctx.config.model.clone(),
            self.ctx.clock.clone(),
            self.queue_rx.clone(),
        );
        tokio::spawn(autoscaler.run(stop_rx));
        *slot = Some(stop_tx);
        info!("autoscaler started");
    }

    /// Re-activate sessions a previous process left running.
    pub async fn resume_sessions(&self) -> Result<Vec<SessionId>, RuntimeError> {
        let resumable = self.ctx.store.lock().resumable()?;
        if resumable.is_empty() {
            return Ok(Vec::new());
        }

        self.ensure_flush_task();
        let mut resumed = Vec::new();
        for session in resumable {
            info!(session = %session.id, "resuming session");
            self.ensure_fleet(None);
            self.ctx.bus.replay().await?;

            let coordinator = Coordinator::top(
                session.id.clone(),
                self.ctx.clone(),
                self.cancel_rx.clone(),
                self.queue_tx.clone(),
            )?;
            let status = coordinator.run().await?;
            info!(session = %session.id, status = %status, "resumed session finished");
            resumed.push(session.id);
        }
        Ok(resumed)
    }

    /// Run one user task to completion and return the sealed session.
    pub async fn run_task(&self, task: &str) -> Result<Session, RuntimeError> {
        self.ensure_flush_task();
        self.resume_sessions().await?;

        let session_id = SessionId::new(format!("s-{}", &self.ids.next()[..8]));
        let mut session = Session::new(
            session_id.clone(),
            task,
            self.ctx.config.architecture,
            self.ctx.clock.epoch_ms(),
        );
        self.ctx.store.lock().create(session.clone())?;

        self.ensure_fleet(Some(&mut session));
        self.ctx.store.lock().update(session.clone())?;
        self.ensure_autoscaler();

        let coordinator = Coordinator::top(
            session_id.clone(),
            self.ctx.clone(),
            self.cancel_rx.clone(),
            self.queue_tx.clone(),
        )?;
        let status = coordinator.run().await?;
        info!(session = %session_id, status = %status, "task finished");

        self.ctx
            .store
            .lock()
            .get(&session_id)
            .ok_or(RuntimeError::SessionNotFound(session_id))
    }

    /// Stop the autoscaler, drain the fleet, flush durable state.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        if let Some(stop) = self.autoscaler_stop.lock().take() {
            let _ = stop.try_send(());
        }
        self.manager.shutdown().await;
        self.ctx.bus.flush()?;
        Ok(())
    }

    /// Drop sealed sessions and prune the log below the live watermark.
    ///
    /// Returns `(sessions_dropped, pruned_up_to_seq)`.
    pub fn cleanup(&self) -> Result<(usize, u64), RuntimeError> {
        let dropped = self.ctx.store.lock().drop_sealed()?;

        let log = self.ctx.bus.log();
        let watermarks = self.ctx.bus.watermarks();
        let prune_to = {
            let watermarks = watermarks.lock();
            let mut log = log.lock();
            log.flush()?;
            // With no live receivers everything already logged is prunable.
            watermarks.min().unwrap_or(log.next_seq().saturating_sub(1))
        };
        if prune_to > 0 {
            let mut log = log.lock();
            log.prune(prune_to)?;
        }
        if dropped > 0 || prune_to > 0 {
            info!(dropped, prune_to, "cleanup complete");
        }
        Ok((dropped, prune_to))
    }

    /// Mark every non-terminal session cancelled so nothing resumes later.
    pub fn cancel_all_sessions(&self) -> Result<Vec<SessionId>, RuntimeError> {
        let mut store = self.ctx.store.lock();
        let running = store.list_by_status(SessionStatus::Running);
        let now_ms = self.ctx.clock.epoch_ms();

        let mut cancelled = Vec::new();
        for mut session in running {
            session.status = SessionStatus::Cancelled;
            let id = session.id.clone();
            if let Err(e) = store.update(session) {
                warn!(session = %id, error = %e, "cancel failed");
                continue;
            }
            store.seal(&id, now_ms)?;
            cancelled.push(id);
        }
        Ok(cancelled)
    }
}

/// Resolve well-known state paths under a state directory, creating it.
pub fn prepare_state_dir(state_dir: &Path) -> std::io::Result<StatePaths> {
    std::fs::create_dir_all(state_dir)?;
    Ok(StatePaths::new(state_dir))
}

#[cfg(test)]
#[path = "runtime_tests.rs"]
mod tests;
