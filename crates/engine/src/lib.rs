// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-engine: the coordination substrate.
//!
//! Agents are long-lived tasks communicating exclusively through bounded
//! inboxes on the dispatch bus; every send is logged before it is enqueued.
//! A coordinator drives each session's subtask graph, the agent manager owns
//! worker lifecycles, and the autoscaler sizes the fleet from queue and GPU
//! pressure. All dependencies arrive through an explicit [`EngineCtx`]; the
//! engine has no process-wide mutable state.

pub mod autoscaler;
pub mod board;
pub mod bus;
pub mod coordinator;
pub mod ctx;
pub mod error;
pub mod manager;
pub mod runtime;
pub mod scheduler;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use autoscaler::{
    evaluate, gpu_max_workers, Autoscaler, DecisionHistory, ScaleAction, ScaleDecision,
    ScaleReason,
};
pub use board::FleetBoard;
pub use bus::{BusError, DispatchBus};
pub use coordinator::Coordinator;
pub use ctx::EngineCtx;
pub use error::RuntimeError;
pub use manager::AgentManager;
pub use runtime::HiveRuntime;
pub use scheduler::{Scheduler, TimerKey};
pub use worker::WorkerRuntime;
