// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared wiring for engine tests.

use crate::bus::DispatchBus;
use crate::ctx::EngineCtx;
use crate::manager::AgentManager;
use crate::FleetBoard;
use hive_adapters::FakeBackend;
use hive_core::{FakeClock, HiveConfig, Session, SessionId};
use hive_storage::{MessageLog, SessionStore, WatermarkTable};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::TempDir;

/// A fully wired engine over fakes and a temp state directory.
pub struct TestRig {
    /// Keeps the state files alive for the rig's lifetime.
    #[allow(dead_code)]
    pub dir: TempDir,
    pub ctx: EngineCtx<FakeBackend, FakeClock>,
    pub manager: AgentManager<FakeBackend, FakeClock>,
    pub backend: FakeBackend,
    pub clock: FakeClock,
}

/// Config with test-friendly timings, pinned explicitly.
pub fn test_config() -> HiveConfig {
    HiveConfig {
        workers: 1,
        inbox_capacity: 16,
        call_timeout_ms: 2_000,
        call_retries: 1,
        subtask_retries: 2,
        retry_backoff_ms: 10,
        send_timeout_ms: 100,
        grace_period_ms: 500,
        ..Default::default()
    }
}

pub fn rig() -> TestRig {
    rig_with(test_config())
}

pub fn rig_with(config: HiveConfig) -> TestRig {
    let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("tempdir: {e}"));
    let log = Arc::new(Mutex::new(
        MessageLog::open(&dir.path().join("messages.log")).unwrap_or_else(|e| panic!("log: {e}")),
    ));
    let watermarks = Arc::new(Mutex::new(
        WatermarkTable::load(&dir.path().join("watermarks.json"))
            .unwrap_or_else(|e| panic!("watermarks: {e}")),
    ));
    let store = Arc::new(Mutex::new(
        SessionStore::open(&dir.path().join("sessions.snapshot"))
            .unwrap_or_else(|e| panic!("store: {e}")),
    ));

    let clock = FakeClock::new();
    let backend = FakeBackend::new();
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
        backend: backend.clone(),
        config,
        clock: clock.clone(),
    };

    TestRig {
        dir,
        ctx,
        manager,
        backend,
        clock,
    }
}

/// Create and persist a running session for the rig.
pub fn seed_session(rig: &TestRig, id: &str, task: &str) -> Session {
    let session = Session::new(
        SessionId::new(id),
        task,
        rig.ctx.config.architecture,
        rig.clock.epoch_ms(),
    );
    rig.ctx
        .store
        .lock()
        .create(session.clone())
        .unwrap_or_else(|e| panic!("create session: {e}"));
    session
}
