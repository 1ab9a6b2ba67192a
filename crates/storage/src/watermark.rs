// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-receiver delivery watermarks.
//!
//! A receiver's watermark is the highest log sequence it has fully
//! processed. Watermarks advance monotonically and are persisted lazily, so
//! a crash may re-deliver messages above the last saved mark; receivers are
//! idempotent on message identity, which makes at-least-once redelivery
//! safe.

use hive_core::AgentId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Errors that can occur in watermark operations
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WatermarkFile {
    marks: HashMap<AgentId, u64>,
}

/// Monotone per-receiver acknowledgement watermarks.
#[derive(Debug)]
pub struct WatermarkTable {
    path: PathBuf,
    marks: HashMap<AgentId, u64>,
    dirty: bool,
}

impl WatermarkTable {
    /// Load the table, starting empty if the file is missing.
    ///
    /// A corrupt file is rotated to `.bak` and replaced with an empty table;
    /// the cost is at-least-once redelivery, never data loss.
    pub fn load(path: &Path) -> Result<Self, WatermarkError> {
        let marks = if path.exists() {
            let file = File::open(path)?;
            match serde_json::from_reader::<_, WatermarkFile>(BufReader::new(file)) {
                Ok(parsed) => parsed.marks,
                Err(e) => {
                    let bak_path = crate::rotate_bak_path(path);
                    warn!(
                        error = %e,
                        path = %path.display(),
                        bak = %bak_path.display(),
                        "Corrupt watermark table, moving to .bak and starting fresh",
                    );
                    std::fs::rename(path, &bak_path)?;
                    HashMap::new()
                }
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_owned(),
            marks,
            dirty: false,
        })
    }

    /// The watermark for a receiver; 0 if none recorded.
    pub fn get(&self, agent: &AgentId) -> u64 {
        self.marks.get(agent).copied().unwrap_or(0)
    }

    /// Advance a receiver's watermark. Backward moves are ignored.
    ///
    /// Returns whether the mark moved.
    pub fn advance(&mut self, agent: &AgentId, seq: u64) -> bool {
        let entry = self.marks.entry(agent.clone()).or_insert(0);
        if seq > *entry {
            *entry = seq;
            self.dirty = true;
            true
        } else {
            false
        }
    }

    /// Drop a receiver's mark so it no longer holds back pruning.
    pub fn remove(&mut self, agent: &AgentId) {
        if self.marks.remove(agent).is_some() {
            self.dirty = true;
        }
    }

    /// Smallest watermark across live receivers; None when empty.
    ///
    /// Pruning the log at or below this value is safe.
    pub fn min(&self) -> Option<u64> {
        self.marks.values().copied().min()
    }

    /// Persist if anything changed since the last save.
    ///
    /// Writes to a temp file then renames, so the table is never observed
    /// half-written.
    pub fn save_if_dirty(&mut self) -> Result<(), WatermarkError> {
        if !self.dirty {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            let record = WatermarkFile {
                marks: self.marks.clone(),
            };
            serde_json::to_writer(&mut writer, &record)?;
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;

        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
#[path = "watermark_tests.rs"]
mod tests;
