// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! GPU- and queue-aware autoscaling.
//!
//! Strategies are pure functions of `(FleetSnapshot, history, config)`;
//! the control loop runs at a fixed cadence, applies decisions through the
//! agent manager, and records them in history. Decisions respect per
//! direction cooldowns and the `min_workers ≤ target ≤ max_workers` bounds,
//! where `max_workers` defaults to the GPU-derived cap. An unavailable GPU
//! snapshot vetoes every scale-up; scale-down from queue pressure stays
//! allowed.

use crate::board::FleetBoard;
use crate::manager::AgentManager;
use hive_adapters::gpu::recommended_memory_mb;
use hive_adapters::{GpuMonitor, LlmBackend};
use hive_core::{AutoscaleConfig, Clock, FleetSnapshot, GpuSnapshot, Role, Strategy};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

/// Scale direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleAction {
    ScaleUp,
    ScaleDown,
    Hold,
}

impl fmt::Display for ScaleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleAction::ScaleUp => "scale-up",
            ScaleAction::ScaleDown => "scale-down",
            ScaleAction::Hold => "hold",
        };
        write!(f, "{s}")
    }
}

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleReason {
    GpuHeadroom,
    GpuPressure,
    QueuePressure,
    LongWaits,
    IdleWorkers,
    Cooldown,
    Bounds,
    GpuVeto,
    GpuUnavailable,
    Steady,
}

impl fmt::Display for ScaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScaleReason::GpuHeadroom => "gpu-headroom",
            ScaleReason::GpuPressure => "gpu-pressure",
            ScaleReason::QueuePressure => "queue-pressure",
            ScaleReason::LongWaits => "long-waits",
            ScaleReason::IdleWorkers => "idle-workers",
            ScaleReason::Cooldown => "cooldown",
            ScaleReason::Bounds => "bounds",
            ScaleReason::GpuVeto => "gpu-veto",
            ScaleReason::GpuUnavailable => "gpu-unavailable",
            ScaleReason::Steady => "steady",
        };
        write!(f, "{s}")
    }
}

/// One autoscaler output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaleDecision {
    pub action: ScaleAction,
    pub delta: usize,
    pub reason: ScaleReason,
    pub target: usize,
}

impl ScaleDecision {
    fn hold(reason: ScaleReason, current: usize) -> Self {
        Self {
            action: ScaleAction::Hold,
            delta: 0,
            reason,
            target: current,
        }
    }
}

/// Rolling decision history with cooldown and idle-cycle tracking.
#[derive(Debug, Default)]
pub struct DecisionHistory {
    entries: VecDeque<(Instant, ScaleDecision)>,
    last_up: Option<Instant>,
    last_down: Option<Instant>,
    /// Consecutive cycles with idle fraction above threshold.
    idle_cycles: u32,
}

const HISTORY_LIMIT: usize = 64;

impl DecisionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision at its emission time.
    pub fn record(&mut self, at: Instant, decision: ScaleDecision) {
        match decision.action {
            ScaleAction::ScaleUp => self.last_up = Some(at),
            ScaleAction::ScaleDown => self.last_down = Some(at),
            ScaleAction::Hold => {}
        }
        self.entries.push_back((at, decision));
        while self.entries.len() > HISTORY_LIMIT {
            self.entries.pop_front();
        }
    }

    /// Track whether this cycle's idle fraction exceeded the threshold.
    pub fn observe_idle_cycle(&mut self, above_threshold: bool) {
        if above_threshold {
            self.idle_cycles += 1;
        } else {
            self.idle_cycles = 0;
        }
    }

    pub fn idle_cycles(&self) -> u32 {
        self.idle_cycles
    }

    /// Whether the direction is still cooling down at `now`.
    pub fn in_cooldown(&self, scale_up: bool, cooldown: Duration, now: Instant) -> bool {
        let last = if scale_up { self.last_up } else { self.last_down };
        match last {
            Some(at) => now.duration_since(at) < cooldown,
            None => false,
        }
    }

    pub fn decisions(&self) -> impl Iterator<Item = &ScaleDecision> {
        self.entries.iter().map(|(_, d)| d)
    }
}

/// GPU-derived worker cap: `floor((free − buffer) × (1 − margin) / per_worker)`.
///
/// `None` when the GPU is unavailable.
pub fn gpu_max_workers(gpu: &GpuSnapshot, model: &str, cfg: &AutoscaleConfig) -> Option<usize> {
    let reading = gpu.reading()?;
    let per_worker = recommended_memory_mb(model).max(1);
    let usable = reading.free_mb.saturating_sub(cfg.memory_buffer_mb) as f64
        * (1.0 - cfg.safety_margin);
    Some((usable / per_worker as f64).floor() as usize)
}

/// Upper bound for the fleet: configured max, else the GPU-derived cap,
/// never below `min_workers`.
fn effective_max(snapshot: &FleetSnapshot, model: &str, cfg: &AutoscaleConfig) -> usize {
    let derived = cfg
        .max_workers
        .or_else(|| gpu_max_workers(&snapshot.gpu, model, cfg))
        .unwrap_or(cfg.min_workers);
    derived.max(cfg.min_workers)
}

/// Thresholds after strategy adjustment.
struct Tuned {
    queue_high: usize,
    wait_high_ms: u64,
    idle_fraction_high: f64,
    gpu_free_high_mb: u64,
    up_cooldown: Duration,
    down_cooldown: Duration,
    max_delta: usize,
}

fn tune(strategy: Strategy, cfg: &AutoscaleConfig) -> Tuned {
    let base = Tuned {
        queue_high: cfg.queue_high,
        wait_high_ms: cfg.wait_high_ms,
        idle_fraction_high: cfg.idle_fraction_high,
        gpu_free_high_mb: cfg.gpu_free_high_mb,
        up_cooldown: cfg.cooldown(true),
        down_cooldown: cfg.cooldown(false),
        max_delta: 1,
    };
    match strategy {
        Strategy::Conservative => Tuned {
            queue_high: base.queue_high * 2,
            wait_high_ms: base.wait_high_ms * 2,
            idle_fraction_high: (base.idle_fraction_high * 0.8).max(0.1),
            up_cooldown: base.up_cooldown * 2,
            down_cooldown: base.down_cooldown * 2,
            ..base
        },
        Strategy::Aggressive => Tuned {
            queue_high: (base.queue_high / 2).max(1),
            wait_high_ms: (base.wait_high_ms / 2).max(1),
            up_cooldown: base.up_cooldown / 2,
            down_cooldown: base.down_cooldown / 2,
            max_delta: cfg.max_batch_delta.max(1),
            ..base
        },
        _ => base,
    }
}

/// Raw gpu-memory recommendation, before bounds and cooldowns.
fn evaluate_gpu(snapshot: &FleetSnapshot, model: &str, cfg: &AutoscaleConfig, tuned: &Tuned) -> ScaleDecision {
    let active = snapshot.active_count();
    let Some(reading) = snapshot.gpu.reading() else {
        return ScaleDecision::hold(ScaleReason::GpuUnavailable, active);
    };

    let per_worker = recommended_memory_mb(model);
    if reading.free_mb >= tuned.gpu_free_high_mb
        && reading.free_mb.saturating_sub(cfg.memory_buffer_mb) >= per_worker
    {
        return ScaleDecision {
            action: ScaleAction::ScaleUp,
            delta: 1,
            reason: ScaleReason::GpuHeadroom,
            target: active + 1,
        };
    }

    let used_fraction = if reading.total_mb == 0 {
        0.0
    } else {
        reading.used_mb as f32 / reading.total_mb as f32
    };
    if used_fraction >= cfg.gpu_used_high_pct && active > 0 {
        return ScaleDecision {
            action: ScaleAction::ScaleDown,
            delta: 1,
            reason: ScaleReason::GpuPressure,
            target: active - 1,
        };
    }

    ScaleDecision::hold(ScaleReason::Steady, active)
}

/// Raw workload recommendation, before bounds and cooldowns.
fn evaluate_workload(
    snapshot: &FleetSnapshot,
    history: &DecisionHistory,
    tuned: &Tuned,
) -> ScaleDecision {
    let active = snapshot.active_count();
    let queue_len = snapshot.queue_len();

    if queue_len > tuned.queue_high {
        let delta = (queue_len / tuned.queue_high.max(1)).clamp(1, tuned.max_delta);
        return ScaleDecision {
            action: ScaleAction::ScaleUp,
            delta,
            reason: ScaleReason::QueuePressure,
            target: active + delta,
        };
    }

    if snapshot.waits.mean_ms() > tuned.wait_high_ms && snapshot.waits.samples() > 0 {
        return ScaleDecision {
            action: ScaleAction::ScaleUp,
            delta: 1,
            reason: ScaleReason::LongWaits,
            target: active + 1,
        };
    }

    // Scale down only after two consecutive idle cycles.
    if snapshot.idle_fraction() > tuned.idle_fraction_high && history.idle_cycles() >= 2 && active > 0 {
        return ScaleDecision {
            action: ScaleAction::ScaleDown,
            delta: 1,
            reason: ScaleReason::IdleWorkers,
            target: active - 1,
        };
    }

    ScaleDecision::hold(ScaleReason::Steady, active)
}

/// The more conservative of two recommendations (smaller target wins).
///
/// On conflict the GPU side holds the scale-up veto: a workload scale-up
/// never survives unless the GPU also recommends one.
fn more_conservative(gpu: ScaleDecision, workload: ScaleDecision) -> ScaleDecision {
    if workload.action == ScaleAction::ScaleUp && gpu.action != ScaleAction::ScaleUp {
        return match gpu.action {
            ScaleAction::ScaleDown => gpu,
            _ => ScaleDecision::hold(
                ScaleReason::GpuVeto,
                workload.target - workload.delta,
            ),
        };
    }
    if gpu.action == ScaleAction::ScaleUp && workload.action == ScaleAction::ScaleUp {
        // Agreement on direction: the workload side sizes the batch, the
        // GPU cap is enforced by the bounds clamp.
        let delta = workload.delta.max(gpu.delta);
        return ScaleDecision {
            action: ScaleAction::ScaleUp,
            delta,
            reason: workload.reason,
            target: workload.target - workload.delta + delta,
        };
    }
    if gpu.target <= workload.target {
        gpu
    } else {
        workload
    }
}

/// Evaluate one cycle: pure function of snapshot, history and config.
pub fn evaluate(
    snapshot: &FleetSnapshot,
    history: &DecisionHistory,
    cfg: &AutoscaleConfig,
    model: &str,
    now: Instant,
) -> ScaleDecision {
    let active = snapshot.active_count();
    let tuned = tune(cfg.strategy, cfg);

    let mut decision = match cfg.strategy {
        Strategy::GpuMemory => evaluate_gpu(snapshot, model, cfg, &tuned),
        Strategy::Workload => evaluate_workload(snapshot, history, &tuned),
        Strategy::Hybrid | Strategy::Conservative | Strategy::Aggressive => more_conservative(
            evaluate_gpu(snapshot, model, cfg, &tuned),
            evaluate_workload(snapshot, history, &tuned),
        ),
    };

    // No scale-up on a stale or missing GPU reading.
    if decision.action == ScaleAction::ScaleUp && snapshot.gpu.reading().is_none() {
        decision = ScaleDecision::hold(ScaleReason::GpuUnavailable, active);
    }

    // Bounds: min_workers ≤ target ≤ max(min_workers, gpu-or-config max).
    let max = effective_max(snapshot, model, cfg);
    match decision.action {
        ScaleAction::ScaleUp => {
            let target = (active + decision.delta).min(max);
            if target <= active {
                // A cap inherited from GPU memory is a veto, a configured
                // ceiling is a plain bound.
                let reason = if cfg.max_workers.is_none() {
                    ScaleReason::GpuVeto
                } else {
                    ScaleReason::Bounds
                };
                decision = ScaleDecision::hold(reason, active);
            } else {
                decision.delta = target - active;
                decision.target = target;
            }
        }
        ScaleAction::ScaleDown => {
            let target = active.saturating_sub(decision.delta).max(cfg.min_workers);
            if target >= active {
                // Zero (or floor-sized) fleet cannot shrink further.
                decision = ScaleDecision::hold(ScaleReason::Bounds, active);
            } else {
                decision.delta = active - target;
                decision.target = target;
            }
        }
        ScaleAction::Hold => {}
    }

    // Cooldown per direction.
    if decision.action != ScaleAction::Hold {
        let scale_up = decision.action == ScaleAction::ScaleUp;
        let cooldown = if scale_up {
            tuned.up_cooldown
        } else {
            tuned.down_cooldown
        };
        if history.in_cooldown(scale_up, cooldown, now) {
            decision = ScaleDecision::hold(ScaleReason::Cooldown, active);
        }
    }

    decision
}

/// The control loop: snapshot, decide, apply through the manager.
pub struct Autoscaler<B: LlmBackend, C: Clock> {
    board: FleetBoard,
    manager: AgentManager<B, C>,
    gpu: Arc<GpuMonitor<C>>,
    cfg: AutoscaleConfig,
    model: String,
    clock: C,
    history: Arc<Mutex<DecisionHistory>>,
    /// Pending-by-priority feed from the live coordinator.
    queue_feed: watch::Receiver<BTreeMap<i32, usize>>,
}

impl<B: LlmBackend, C: Clock> Autoscaler<B, C> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        board: FleetBoard,
        manager: AgentManager<B, C>,
        gpu: Arc<GpuMonitor<C>>,
        cfg: AutoscaleConfig,
        model: String,
        clock: C,
        queue_feed: watch::Receiver<BTreeMap<i32, usize>>,
    ) -> Self {
        Self {
            board,
            manager,
            gpu,
            cfg,
            model,
            clock,
            history: Arc::new(Mutex::new(DecisionHistory::new())),
            queue_feed,
        }
    }

    pub fn history(&self) -> Arc<Mutex<DecisionHistory>> {
        Arc::clone(&self.history)
    }

    /// Run one evaluation cycle and apply the decision.
    pub async fn tick(&self) -> ScaleDecision {
        let pending = self.queue_feed.borrow().clone();
        let gpu = self.gpu.snapshot().await;
        let snapshot = self.board.snapshot(pending, gpu);

        let tuned_idle = tune(self.cfg.strategy, &self.cfg).idle_fraction_high;
        let now = self.clock.now();
        let decision = {
            let mut history = self.history.lock();
            history.observe_idle_cycle(snapshot.idle_fraction() > tuned_idle);
            let decision = evaluate(&snapshot, &history, &self.cfg, &self.model, now);
            history.record(now, decision.clone());
            decision
        };

        debug!(
            action = %decision.action,
            delta = decision.delta,
            reason = %decision.reason,
            target = decision.target,
            "autoscaler decision"
        );

        match decision.action {
            ScaleAction::ScaleUp => {
                let created = self.manager.create_batch(decision.delta, &[Role::Generic]);
                if !created.is_empty() {
                    info!(count = created.len(), "scaled up");
                }
            }
            ScaleAction::ScaleDown => {
                // Drain idle workers first; busy ones keep their work.
                let mut remaining = decision.delta;
                for (id, _) in self.board.idle_workers() {
                    if remaining == 0 {
                        break;
                    }
                    self.manager.drain(&id);
                    remaining -= 1;
                }
                if remaining < decision.delta {
                    info!(count = decision.delta - remaining, "scaled down");
                }
            }
            ScaleAction::Hold => {}
        }

        decision
    }

    /// Run the loop at the configured cadence until `stop` flips.
    pub async fn run(self, mut stop: mpsc::Receiver<()>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.cfg.interval_ms.max(100)));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = stop.recv() => break,
            }
        }
    }
}

#[cfg(test)]
#[path = "autoscaler_tests.rs"]
mod tests;
