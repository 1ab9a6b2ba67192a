//! Restart and redelivery idempotence.

use crate::prelude::{reopen, spec_config, spec_rig};
use hive_adapters::FakeBackend;
use hive_core::{Session, SessionId, SessionStatus, SubtaskState};

/// A session interrupted mid-flight resumes to the same graph, keeps the
/// results of finished subtasks, and only re-executes unfinished work.
#[tokio::test]
async fn restart_resumes_in_flight_sessions_idempotently() {
    let rig = spec_rig(spec_config());

    // Seed a session the way a crashed process would have left it:
    // one subtask done with its result, one in-flight, one pending on it.
    let mut session = Session::new(
        SessionId::new("s-crashed"),
        "finish the report",
        hive_core::Architecture::Centralized,
        1_000,
    );
    let a = session.graph.add("gather numbers", None, 3, Default::default(), None);
    let b = session.graph.add("draft text", None, 2, Default::default(), None);
    let c = session
        .graph
        .add("merge, using the draft", None, 1, [b].into_iter().collect(), None);
    session.graph.refresh_ready();
    session.graph.mark_in_flight(a, "worker-0".into());
    session.graph.mark_done(a, "NUMBERS");
    session.graph.mark_in_flight(b, "worker-0".into());
    rig.runtime.ctx().store.lock().create(session).unwrap();
    drop(rig.runtime);

    // "Restart": a new process over the same state directory.
    let rig = reopen(rig.dir, spec_config(), FakeBackend::new());
    rig.backend.reply_containing("draft text", "DRAFT");
    rig.backend.reply_containing("merge", "MERGED");
    rig.backend.reply_containing("editor", "FINAL");

    let resumed = rig.runtime.resume_sessions().await.unwrap();
    assert_eq!(resumed, vec![SessionId::new("s-crashed")]);

    let session = rig
        .runtime
        .ctx()
        .store
        .lock()
        .get(&SessionId::new("s-crashed"))
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.graph.len(), 3);

    // The finished subtask kept its pre-crash result and never re-ran.
    assert_eq!(
        session.graph.get(a).and_then(|s| s.result.clone()),
        Some("NUMBERS".to_string())
    );
    assert_eq!(rig.backend.calls_containing("gather numbers"), 0);

    // The orphaned in-flight subtask ran again, then its dependent.
    assert_eq!(rig.backend.calls_containing("draft text"), 1);
    assert_eq!(
        session.graph.get(c).map(|s| s.state),
        Some(SubtaskState::Done)
    );

    rig.runtime.shutdown().await.unwrap();
}

/// Completed sessions are sealed and replay no work on restart.
#[tokio::test]
async fn sealed_sessions_do_not_resume() {
    let rig = spec_rig(spec_config());
    rig.backend
        .reply_containing("planning assistant", r#"["one step"]"#);
    rig.backend.set_default_reply("done");
    let finished = rig.runtime.run_task("a single step").await.unwrap();
    assert!(finished.is_sealed());
    rig.runtime.shutdown().await.unwrap();
    drop(rig.runtime);

    let rig = reopen(rig.dir, spec_config(), FakeBackend::new());
    assert!(rig.runtime.resume_sessions().await.unwrap().is_empty());
    // No LLM traffic at all.
    assert_eq!(rig.backend.call_count(), 0);

    // The stored record is byte-for-byte the pre-restart session.
    let stored = rig
        .runtime
        .ctx()
        .store
        .lock()
        .get(&finished.id)
        .unwrap();
    assert_eq!(stored, finished);
}

/// Re-delivering a subtask after a dead-letter yields exactly one `done`
/// transition.
#[tokio::test]
async fn redelivery_is_idempotent_on_the_graph() {
    let mut graph = hive_core::SubtaskGraph::new();
    let id = graph.add("task", None, 0, Default::default(), None);
    graph.refresh_ready();
    graph.mark_in_flight(id, "worker-0".into());

    assert!(graph.mark_done(id, "first delivery"));
    assert!(!graph.mark_done(id, "second delivery"));
    assert_eq!(
        graph.get(id).and_then(|s| s.result.as_deref()),
        Some("first delivery")
    );
}
