// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine dependency bundle.
//!
//! Coordinators, the manager and the autoscaler are constructed with an
//! explicit context instead of reaching for globals; everything shared is
//! behind its own lock with no suspension while held.

use crate::board::FleetBoard;
use crate::bus::DispatchBus;
use hive_core::{Clock, HiveConfig};
use hive_storage::SessionStore;
use parking_lot::Mutex;
use std::sync::Arc;

/// Shared handles every engine component is built from.
pub struct EngineCtx<B, C: Clock> {
    pub bus: DispatchBus<C>,
    pub store: Arc<Mutex<SessionStore>>,
    pub board: FleetBoard,
    pub backend: B,
    pub config: Arc<HiveConfig>,
    pub clock: C,
}

impl<B: Clone, C: Clock> Clone for EngineCtx<B, C> {
    fn clone(&self) -> Self {
        Self {
            bus: self.bus.clone(),
            store: Arc::clone(&self.store),
            board: self.board.clone(),
            backend: self.backend.clone(),
            config: Arc::clone(&self.config),
            clock: self.clock.clone(),
        }
    }
}
