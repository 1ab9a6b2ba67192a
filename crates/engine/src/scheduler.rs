// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer wheel for deadlines and retry backoff

use hive_core::SubtaskId;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// What a timer means when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// Absolute subtask deadline elapsed.
    Deadline(SubtaskId),
    /// Retry backoff for a failed attempt elapsed.
    Retry(SubtaskId),
}

/// Manages timers for a coordinator
#[derive(Debug, Default)]
pub struct Scheduler {
    timers: HashMap<TimerKey, Instant>,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a timer
    pub fn set(&mut self, key: TimerKey, duration: Duration, now: Instant) {
        self.timers.insert(key, now + duration);
    }

    /// Cancel a timer
    pub fn cancel(&mut self, key: &TimerKey) {
        self.timers.remove(key);
    }

    /// Remove and return all timers that have fired, in key order by
    /// subtask id so behavior is deterministic.
    pub fn fired(&mut self, now: Instant) -> Vec<TimerKey> {
        let mut fired: Vec<TimerKey> = self
            .timers
            .iter()
            .filter(|(_, fires_at)| **fires_at <= now)
            .map(|(key, _)| *key)
            .collect();
        fired.sort_by_key(|key| match key {
            TimerKey::Deadline(id) => (0u8, *id),
            TimerKey::Retry(id) => (1u8, *id),
        });
        for key in &fired {
            self.timers.remove(key);
        }
        fired
    }

    /// Whether any retry timer is pending.
    pub fn has_pending_retries(&self) -> bool {
        self.timers
            .keys()
            .any(|key| matches!(key, TimerKey::Retry(_)))
    }

    /// The next timer fire time
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().copied().min()
    }

    /// Check if there are any pending timers
    pub fn has_timers(&self) -> bool {
        !self.timers.is_empty()
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
