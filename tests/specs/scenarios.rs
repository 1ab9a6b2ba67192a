//! End-to-end orchestration scenarios over fake backends.

use crate::prelude::{spec_config, spec_rig};
use hive_core::{Architecture, SessionStatus, SubtaskId, SubtaskState};
use hive_storage::MessageFilter;
use std::time::Duration;

#[tokio::test]
async fn single_subtask_success() {
    let rig = spec_rig(spec_config());
    rig.backend
        .reply_containing("planning assistant", r#"["print the current date"]"#);
    rig.backend
        .reply_containing("print the current date", "2024-01-01");

    let session = rig.runtime.run_task("Print the current date").await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.result.as_deref().unwrap_or_default().contains("2024-01-01"));

    let done: Vec<_> = session
        .graph
        .iter()
        .filter(|s| s.state == SubtaskState::Done)
        .collect();
    assert_eq!(done.len(), 1);
    assert_eq!(session.graph.len(), 1);

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn dependency_chain_runs_in_order() {
    let rig = spec_rig(spec_config());
    rig.backend.reply_containing(
        "planning assistant",
        r#"["analyze sales data", "build report using the analysis"]"#,
    );
    rig.backend.reply_containing("analyze sales data", "ANALYSIS");
    rig.backend.reply_containing("build report", "REPORT");
    rig.backend.reply_containing("editor", "ANALYSIS; REPORT");

    let session = rig
        .runtime
        .run_task("Analyze sales data then build a report")
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("ANALYSIS; REPORT"));

    // The second subtask depends on the first and could only start after
    // it finished: backend call order proves the ordering.
    let calls = rig.backend.calls();
    let analyze_at = calls
        .iter()
        .position(|c| c.prompt.contains("analyze sales data") && !c.prompt.contains("planning"))
        .unwrap();
    let report_at = calls
        .iter()
        .position(|c| c.prompt.contains("build report"))
        .unwrap();
    assert!(analyze_at < report_at);

    // Aggregation carried both results in subtask order.
    let synthesis = calls
        .iter()
        .find(|c| c.prompt.contains("editor"))
        .unwrap();
    let analysis_pos = synthesis.prompt.find("ANALYSIS").unwrap();
    let report_pos = synthesis.prompt.find("REPORT").unwrap();
    assert!(analysis_pos < report_pos);

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn retry_then_succeed_makes_exactly_two_calls() {
    let rig = spec_rig(spec_config());
    rig.backend
        .reply_containing("planning assistant", r#"["task A"]"#);
    // call_retries is 0, so the worker surfaces the transient failure and
    // the coordinator owns the retry.
    rig.backend.fail_containing(
        "task A",
        hive_adapters::BackendError::Transient("first call blips".into()),
    );
    rig.backend.reply_containing("task A", "task A done");

    let session = rig.runtime.run_task("run the alpha item").await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("task A done"));
    let subtask = session.graph.get(SubtaskId(0)).unwrap();
    assert_eq!(subtask.state, SubtaskState::Done);
    assert_eq!(subtask.attempts, 2);
    assert_eq!(rig.backend.calls_containing("task A"), 2);

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn exhausted_retries_fail_the_session_with_a_summary() {
    let mut config = spec_config();
    config.subtask_retries = 1;
    let rig = spec_rig(config);
    rig.backend
        .reply_containing("planning assistant", r#"["task A"]"#);
    for _ in 0..2 {
        rig.backend.fail_containing(
            "task A",
            hive_adapters::BackendError::Transient("persistent failure".into()),
        );
    }

    let session = rig.runtime.run_task("do task A").await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    let summary = session.error_summary().unwrap();
    assert!(summary.contains("persistent failure"));
    assert!(summary.contains("st-0"));

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn dependency_failure_propagates_without_execution() {
    let mut config = spec_config();
    config.subtask_retries = 0;
    let rig = spec_rig(config);
    rig.backend.reply_containing(
        "planning assistant",
        r#"["collect input", "summarize using the input"]"#,
    );
    rig.backend.fail_containing(
        "collect input",
        hive_adapters::BackendError::Transient("no input".into()),
    );

    let session = rig.runtime.run_task("collect then summarize").await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    let dependent = session.graph.get(SubtaskId(1)).unwrap();
    assert_eq!(dependent.state, SubtaskState::Failed);
    assert!(dependent
        .error
        .as_deref()
        .unwrap_or_default()
        .starts_with("dependency-failed"));
    // The dependent never reached a worker.
    assert_eq!(rig.backend.calls_containing("summarize using"), 0);

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn worker_death_mid_flight_reassigns_the_subtask() {
    let mut config = spec_config();
    config.workers = 2;
    let rig = spec_rig(config);
    rig.backend
        .reply_containing("planning assistant", r#"["task A", "task B"]"#);
    rig.backend.delay_containing("task A", Duration::from_millis(700));
    rig.backend.reply_containing("task A", "A done");
    rig.backend.reply_containing("task B", "B done");
    rig.backend.reply_containing("editor", "A and B done");

    let runtime = std::sync::Arc::clone(&rig.runtime);
    let task = tokio::spawn(async move { runtime.run_task("two independent chores").await });

    // Wait until some worker holds task A in flight, then kill it.
    let victim = loop {
        tokio::time::sleep(Duration::from_millis(50)).await;
        let members = rig.runtime.ctx().board.members();
        let busy = members.into_iter().find(|id| {
            rig.runtime
                .ctx()
                .board
                .current_work(id)
                .and_then(|m| m.assignment().map(|a| a.text.contains("task A")))
                .unwrap_or(false)
        });
        if let Some(id) = busy {
            break id;
        }
    };
    rig.runtime.manager().terminate(&victim, true).await;

    let session = task.await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // The log shows the synthesized failure followed by a fresh dispatch
    // for the same correlation.
    rig.runtime.ctx().bus.flush().unwrap();
    let log = rig.runtime.ctx().bus.log();
    let correlation = format!("{}:queen:st-0", session.id);
    let chain = log
        .lock()
        .read(0, 0, &MessageFilter::correlation(correlation.as_str()))
        .unwrap();

    let error_at = chain
        .iter()
        .position(|m| m.text().map(|t| t.contains("worker-terminated")).unwrap_or(false));
    let error_at = error_at.expect("log carries the worker-terminated error");
    let redispatch = chain[error_at..]
        .iter()
        .any(|m| m.kind == hive_core::MessageKind::Subtask);
    assert!(redispatch, "a fresh subtask follows the worker-terminated error");

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn hierarchical_session_delegates_and_completes() {
    let mut config = spec_config();
    config.architecture = Architecture::Hierarchical;
    config.workers = 2;
    config.sub_coordinators = 2;
    let rig = spec_rig(config);

    // Top-level decomposition, then each branch re-decomposes; branch
    // decompositions fall back to single subtasks via the default reply.
    rig.backend.reply_containing(
        "planning assistant",
        r#"["research the topic", "write the article"]"#,
    );
    rig.backend.set_default_reply("branch result");
    rig.backend.reply_containing("editor", "final article");

    let session = rig
        .runtime
        .run_task("research a topic and write an article")
        .await
        .unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.result.as_deref(), Some("final article"));
    assert!(session.graph.is_complete());

    rig.runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn mesh_workers_share_responses() {
    let mut config = spec_config();
    config.architecture = Architecture::Mesh;
    config.workers = 2;
    let rig = spec_rig(config);
    rig.backend
        .reply_containing("planning assistant", r#"["half one", "half two"]"#);
    rig.backend.set_default_reply("partial result");
    rig.backend.reply_containing("editor", "merged");

    let session = rig.runtime.run_task("solve both halves").await.unwrap();
    assert_eq!(session.status, SessionStatus::Completed);

    // Peer copies of responses flowed worker-to-worker through the bus.
    rig.runtime.ctx().bus.flush().unwrap();
    let log = rig.runtime.ctx().bus.log();
    let all = log.lock().read(0, 0, &MessageFilter::default()).unwrap();
    let peer_shares = all
        .iter()
        .filter(|m| {
            m.kind == hive_core::MessageKind::Response
                && m.sender.as_str().starts_with("worker-")
                && m.receiver.as_str().starts_with("worker-")
        })
        .count();
    assert!(peer_shares > 0, "mesh produced no worker-to-worker responses");

    rig.runtime.shutdown().await.unwrap();
}
