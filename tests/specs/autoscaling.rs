//! Autoscaler behavior over a live fleet of fake workers.

use hive_adapters::{FakeBackend, FakeGpuProbe, GpuMonitor};
use hive_core::{AutoscaleConfig, FakeClock, HiveConfig, Strategy};
use hive_engine::bus::DispatchBus;
use hive_engine::{AgentManager, Autoscaler, FleetBoard, ScaleAction};
use hive_storage::{MessageLog, WatermarkTable};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

struct ScaleRig {
    _dir: tempfile::TempDir,
    board: FleetBoard,
    manager: AgentManager<FakeBackend, FakeClock>,
    clock: FakeClock,
    autoscaler: Autoscaler<FakeBackend, FakeClock>,
    queue_tx: tokio::sync::watch::Sender<BTreeMap<i32, usize>>,
}

fn scale_rig(autoscale: AutoscaleConfig, gpu_probe: FakeGpuProbe) -> ScaleRig {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(
        MessageLog::open(&dir.path().join("messages.log")).unwrap(),
    ));
    let watermarks = Arc::new(Mutex::new(
        WatermarkTable::load(&dir.path().join("watermarks.json")).unwrap(),
    ));

    let clock = FakeClock::new();
    let backend = FakeBackend::new();
    let config = Arc::new(HiveConfig {
        grace_period_ms: 200,
        ..Default::default()
    });
    let bus = DispatchBus::new(
        log,
        watermarks,
        config.inbox_capacity,
        config.send_timeout(),
        clock.clone(),
    );
    let board = FleetBoard::new();
    let manager = AgentManager::new(
        bus,
        board.clone(),
        backend,
        Arc::clone(&config),
        clock.clone(),
    );

    let gpu = Arc::new(GpuMonitor::with_probes(
        vec![Box::new(gpu_probe)],
        clock.clone(),
    ));
    let (queue_tx, queue_rx) = tokio::sync::watch::channel(BTreeMap::new());
    let autoscaler = Autoscaler::new(
        board.clone(),
        manager.clone(),
        gpu,
        autoscale,
        "llama3".to_string(),
        clock.clone(),
        queue_rx,
    );

    ScaleRig {
        _dir: dir,
        board,
        manager,
        clock,
        autoscaler,
        queue_tx,
    }
}

fn workload_config() -> AutoscaleConfig {
    AutoscaleConfig {
        strategy: Strategy::Workload,
        min_workers: 1,
        max_workers: Some(8),
        queue_high: 5,
        idle_fraction_high: 0.5,
        scale_up_cooldown_ms: 1_000,
        scale_down_cooldown_ms: 1_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn burst_scales_up_to_max_then_drains_back_to_min() {
    let rig = scale_rig(workload_config(), FakeGpuProbe::with_memory(131_072, 1_024));
    rig.manager.create_batch(1, &[hive_core::Role::Generic]);

    // A burst of 20 queued subtasks.
    let mut burst = BTreeMap::new();
    burst.insert(0, 20usize);
    rig.queue_tx.send(burst).unwrap();

    // Workers grow toward the max, one cooldown window at a time.
    for _ in 0..12 {
        rig.autoscaler.tick().await;
        rig.clock.advance(Duration::from_millis(1_100));
    }
    assert_eq!(rig.board.active_count(), 8);

    // Queue drains; idle fraction stays high for consecutive cycles.
    rig.queue_tx.send(BTreeMap::new()).unwrap();
    for _ in 0..20 {
        rig.autoscaler.tick().await;
        rig.clock.advance(Duration::from_millis(1_100));
        // Let drained workers finish exiting.
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert_eq!(rig.board.active_count(), 1);

    // Every decision respected the configured bounds.
    let history = rig.autoscaler.history();
    for decision in history.lock().decisions() {
        assert!(decision.target >= 1 && decision.target <= 8);
    }

    rig.manager.shutdown().await;
}

#[tokio::test]
async fn gpu_veto_blocks_scale_up_despite_queue_pressure() {
    // Hybrid strategy; the model wants 4 GB but only 5 GB is free with a
    // 1 GB buffer and 15% margin: derived cap is zero.
    let autoscale = AutoscaleConfig {
        strategy: Strategy::Hybrid,
        min_workers: 1,
        max_workers: None,
        memory_buffer_mb: 1_024,
        safety_margin: 0.15,
        scale_up_cooldown_ms: 0,
        ..Default::default()
    };
    let rig = scale_rig(autoscale, FakeGpuProbe::with_memory(8_192, 3_072));
    rig.manager.create_batch(1, &[hive_core::Role::Generic]);

    let mut pressure = BTreeMap::new();
    pressure.insert(0, 50usize);
    rig.queue_tx.send(pressure).unwrap();

    for _ in 0..10 {
        let decision = rig.autoscaler.tick().await;
        assert_ne!(decision.action, ScaleAction::ScaleUp);
        rig.clock.advance(Duration::from_secs(60));
    }
    assert_eq!(rig.board.active_count(), 1);

    rig.manager.shutdown().await;
}

#[tokio::test]
async fn unavailable_gpu_blocks_scale_up() {
    let autoscale = AutoscaleConfig {
        strategy: Strategy::Workload,
        min_workers: 1,
        max_workers: Some(8),
        scale_up_cooldown_ms: 0,
        ..Default::default()
    };
    let rig = scale_rig(autoscale, FakeGpuProbe::unavailable());
    rig.manager.create_batch(1, &[hive_core::Role::Generic]);

    let mut pressure = BTreeMap::new();
    pressure.insert(0, 50usize);
    rig.queue_tx.send(pressure).unwrap();

    for _ in 0..5 {
        let decision = rig.autoscaler.tick().await;
        assert_ne!(decision.action, ScaleAction::ScaleUp);
        rig.clock.advance(Duration::from_secs(60));
    }

    rig.manager.shutdown().await;
}
