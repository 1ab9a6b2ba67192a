// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::test_helpers::rig;
use hive_core::test_support::test_subtask_message;
use hive_core::{AgentLifecycle, SessionId};

fn cell(state: AgentLifecycle) -> LifecycleCell {
    Arc::new(Mutex::new(state))
}

#[tokio::test]
async fn send_logs_then_enqueues() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let mut inbox = bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap();

    let stamped = bus
        .send(test_subtask_message("s-1", "queen", "worker-1", 0))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stamped.seq, 1);

    let delivered = inbox.recv().await.unwrap();
    assert_eq!(delivered.seq, 1);
    assert_eq!(delivered.receiver, "worker-1");

    // The log holds the same record.
    bus.flush().unwrap();
    let log = bus.log();
    let read = log
        .lock()
        .read(0, 0, &hive_storage::MessageFilter::receiver("worker-1"))
        .unwrap();
    assert_eq!(read.len(), 1);
    assert_eq!(read[0].seq, 1);
}

#[tokio::test]
async fn duplicate_identity_is_rejected_while_live() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let live = cell(AgentLifecycle::Active);
    bus.register("worker-1".into(), Arc::clone(&live)).unwrap();

    let err = bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap_err();
    assert!(matches!(err, BusError::DuplicateIdentity(_)));

    // A terminated prior owner is replaceable.
    *live.lock() = AgentLifecycle::Terminated;
    assert!(bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .is_ok());
}

#[tokio::test]
async fn missing_receiver_dead_letters_to_sender() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let mut queen_inbox = bus
        .register("queen".into(), cell(AgentLifecycle::Active))
        .unwrap();

    let delivered = bus
        .send(test_subtask_message("s-1", "queen", "worker-9", 4))
        .await
        .unwrap();
    assert!(delivered.is_none());

    let dead = queen_inbox.recv().await.unwrap();
    assert_eq!(dead.kind, MessageKind::Error);
    assert_eq!(dead.correlation, "corr-4");
    assert!(dead.text().unwrap_or_default().starts_with(DEAD_LETTER_PREFIX));
}

#[tokio::test]
async fn terminated_receiver_dead_letters_to_sender() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let mut queen_inbox = bus
        .register("queen".into(), cell(AgentLifecycle::Active))
        .unwrap();
    bus.register("worker-1".into(), cell(AgentLifecycle::Terminated))
        .unwrap();

    let delivered = bus
        .send(test_subtask_message("s-1", "queen", "worker-1", 0))
        .await
        .unwrap();
    assert!(delivered.is_none());
    assert_eq!(queen_inbox.recv().await.unwrap().kind, MessageKind::Error);
}

#[tokio::test]
async fn error_replies_to_unreachable_agents_are_dropped() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let origin = test_subtask_message("s-1", "ghost", "worker-1", 0);
    let error = Message::error(&origin, "worker-1".into(), "late failure", 1);

    // No bounce storm: the error simply disappears.
    assert!(bus.send(error).await.unwrap().is_none());
}

#[tokio::test]
async fn full_inbox_is_backpressure_within_timeout() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    // Capacity 16 from the test config; fill it without consuming.
    let _inbox = bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap();
    for i in 0..16 {
        bus.send(test_subtask_message("s-1", "queen", "worker-1", i))
            .await
            .unwrap();
    }

    let start = std::time::Instant::now();
    let err = bus
        .send(test_subtask_message("s-1", "queen", "worker-1", 99))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::Backpressure(_)));
    // send_timeout_ms is 100 in the test config.
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn pairwise_fifo_is_preserved() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let mut inbox = bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap();

    for i in 0..5 {
        bus.send(test_subtask_message("s-1", "queen", "worker-1", i))
            .await
            .unwrap();
    }

    let mut last_seq = 0;
    for i in 0..5 {
        let message = inbox.recv().await.unwrap();
        assert!(message.seq > last_seq);
        last_seq = message.seq;
        assert_eq!(
            message.assignment().map(|a| a.subtask_id.0),
            Some(i)
        );
    }
}

#[tokio::test]
async fn broadcast_reaches_current_members_only() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let mut worker1 = bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap();
    let mut worker2 = bus
        .register("worker-2".into(), cell(AgentLifecycle::Active))
        .unwrap();
    bus.register("queen".into(), cell(AgentLifecycle::Active))
        .unwrap();

    bus.broadcast(
        SessionId::new("s-1"),
        "queen".into(),
        ControlSignal::Shutdown,
    )
    .await
    .unwrap();

    for inbox in [&mut worker1, &mut worker2] {
        let message = inbox.recv().await.unwrap();
        assert_eq!(message.kind, MessageKind::Control);
        assert_eq!(message.sender, "queen");
    }
}

#[tokio::test]
async fn replay_redelivers_above_watermark() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    let lifecycle = cell(AgentLifecycle::Active);
    let mut inbox = bus
        .register("worker-1".into(), Arc::clone(&lifecycle))
        .unwrap();
    for i in 0..3 {
        bus.send(test_subtask_message("s-1", "queen", "worker-1", i))
            .await
            .unwrap();
    }

    // Simulate processing of the first two.
    let first = inbox.recv().await.unwrap();
    let second = inbox.recv().await.unwrap();
    bus.ack(&"worker-1".into(), first.seq);
    bus.ack(&"worker-1".into(), second.seq);

    // Restart: the old incarnation dies, a fresh one registers, replay
    // redelivers everything above the watermark.
    drop(inbox);
    *lifecycle.lock() = AgentLifecycle::Terminated;
    let mut inbox = bus
        .register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap();
    let delivered = bus.replay().await.unwrap();
    assert_eq!(delivered, 1);

    let replayed = inbox.recv().await.unwrap();
    assert_eq!(replayed.assignment().map(|a| a.subtask_id.0), Some(2));
}

#[tokio::test]
async fn deregister_removes_membership_and_watermark() {
    let rig = rig();
    let bus = &rig.ctx.bus;

    bus.register("worker-1".into(), cell(AgentLifecycle::Active))
        .unwrap();
    bus.ack(&"worker-1".into(), 5);
    assert!(bus.is_registered(&"worker-1".into()));

    bus.deregister(&"worker-1".into());
    assert!(!bus.is_registered(&"worker-1".into()));
    assert!(bus.watermarks().lock().min().is_none());
}
