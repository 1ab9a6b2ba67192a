// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hive_adapters::{FakeBackend, GpuMonitor};
use hive_core::{FakeClock, HiveConfig, SessionStatus};
use std::sync::Arc;

fn test_runtime(
    dir: &tempfile::TempDir,
    config: HiveConfig,
) -> (HiveRuntime<FakeBackend, FakeClock>, FakeBackend) {
    let backend = FakeBackend::new();
    let clock = FakeClock::new();
    let gpu = Arc::new(GpuMonitor::with_probes(Vec::new(), clock.clone()));
    let paths = StatePaths::new(dir.path());
    let runtime = HiveRuntime::open(&paths, backend.clone(), gpu, config, clock)
        .unwrap_or_else(|e| panic!("open runtime: {e}"));
    (runtime, backend)
}

fn quick_config() -> HiveConfig {
    HiveConfig {
        workers: 1,
        call_timeout_ms: 2_000,
        retry_backoff_ms: 10,
        send_timeout_ms: 100,
        grace_period_ms: 300,
        ..Default::default()
    }
}

#[tokio::test]
async fn run_task_produces_a_sealed_session() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, backend) = test_runtime(&dir, quick_config());
    backend.reply_containing("planning assistant", r#"["say hello"]"#);
    backend.reply_containing("say hello", "hello!");

    let session = runtime.run_task("say hello to the user").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.is_sealed());
    assert_eq!(session.result.as_deref(), Some("hello!"));
    assert_eq!(session.agents.len(), 1);

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn state_survives_runtime_reopen() {
    let dir = tempfile::tempdir().unwrap();

    {
        let (runtime, backend) = test_runtime(&dir, quick_config());
        backend.reply_containing("planning assistant", r#"["task a"]"#);
        backend.set_default_reply("done");
        runtime.run_task("do task a").await.unwrap();
        runtime.shutdown().await.unwrap();
    }

    let (runtime, _backend) = test_runtime(&dir, quick_config());
    let sessions = runtime.ctx().store.lock().list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].status, SessionStatus::Completed);
    // Nothing non-terminal to resume.
    assert!(runtime.resume_sessions().await.unwrap().is_empty());
}

#[tokio::test]
async fn cancel_all_sessions_seals_running_ones() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, _backend) = test_runtime(&dir, quick_config());

    let session = hive_core::Session::new(
        "s-stuck".into(),
        "never finished",
        hive_core::Architecture::Centralized,
        1,
    );
    runtime.ctx().store.lock().create(session).unwrap();

    let cancelled = runtime.cancel_all_sessions().unwrap();
    assert_eq!(cancelled.len(), 1);

    let stored = runtime.ctx().store.lock().get(&"s-stuck".into()).unwrap();
    assert_eq!(stored.status, SessionStatus::Cancelled);
    assert!(stored.is_sealed());
}

#[tokio::test]
async fn cleanup_drops_sealed_sessions_and_prunes_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, backend) = test_runtime(&dir, quick_config());
    backend.reply_containing("planning assistant", r#"["one thing"]"#);
    backend.set_default_reply("done");

    runtime.run_task("one thing please").await.unwrap();
    runtime.shutdown().await.unwrap();

    let (dropped, pruned_to) = runtime.cleanup().unwrap();
    assert_eq!(dropped, 1);
    assert!(pruned_to > 0);
    assert!(runtime.ctx().store.lock().list().is_empty());
}
