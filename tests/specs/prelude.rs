//! Shared helpers for workspace specs.

use hive_adapters::{FakeBackend, GpuMonitor};
use hive_core::{FakeClock, HiveConfig};
use hive_engine::runtime::StatePaths;
use hive_engine::HiveRuntime;
use std::sync::Arc;

pub struct SpecRig {
    pub dir: tempfile::TempDir,
    pub runtime: Arc<HiveRuntime<FakeBackend, FakeClock>>,
    pub backend: FakeBackend,
}

/// Timings tuned so specs run in milliseconds, pinned explicitly.
pub fn spec_config() -> HiveConfig {
    HiveConfig {
        workers: 1,
        call_timeout_ms: 5_000,
        call_retries: 0,
        subtask_retries: 3,
        retry_backoff_ms: 10,
        send_timeout_ms: 200,
        grace_period_ms: 500,
        ..Default::default()
    }
}

/// Build a runtime over fakes in a fresh state directory.
pub fn spec_rig(config: HiveConfig) -> SpecRig {
    let dir = tempfile::tempdir().unwrap();
    reopen(dir, config, FakeBackend::new())
}

/// Re-open a state directory with a fresh backend, as a restart would.
pub fn reopen(dir: tempfile::TempDir, config: HiveConfig, backend: FakeBackend) -> SpecRig {
    let clock = FakeClock::new();
    let gpu = Arc::new(GpuMonitor::with_probes(Vec::new(), clock.clone()));
    let paths = StatePaths::new(dir.path());
    let runtime = HiveRuntime::open(&paths, backend.clone(), gpu, config, clock).unwrap();
    SpecRig {
        dir,
        runtime: Arc::new(runtime),
        backend,
    }
}
