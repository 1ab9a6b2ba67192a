// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable session store.
//!
//! Sessions live in memory and persist as a zstd-compressed JSON snapshot
//! written atomically: write to `.tmp`, fsync the file, rename, fsync the
//! directory. Updates use compare-and-swap on the session's version field to
//! prevent lost updates under concurrent mutation; sealed sessions are
//! immutable.
//!
//! All file I/O goes through the [`StoreWriter`] trait so tests can verify
//! the fsync ordering and inject failures.

use chrono::{DateTime, Utc};
use hive_core::{CorrelationId, Session, SessionId, SessionStatus, SubtaskState};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// Snapshot format version; bump on incompatible schema changes.
pub const CURRENT_STORE_VERSION: u32 = 1;

/// Errors that can occur in session store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("compression error: {0}")]
    Compress(String),
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("session already exists: {0}")]
    Exists(SessionId),
    #[error("version conflict on {id}: expected {expected}, got {actual}")]
    VersionConflict {
        id: SessionId,
        expected: u64,
        actual: u64,
    },
    #[error("session is sealed: {0}")]
    Sealed(SessionId),
    #[error("snapshot version {0} is newer than supported {1}")]
    TooNew(u32, u32),
}

/// Trait abstracting snapshot I/O for testability.
pub trait StoreWriter: Send + Sync + 'static {
    /// Write compressed snapshot data to a temporary file.
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), StoreError>;

    /// Fsync a file to ensure data is durable.
    fn fsync_file(&self, path: &Path) -> Result<(), StoreError>;

    /// Atomically rename tmp file to final path.
    fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError>;

    /// Fsync directory to make rename durable.
    fn fsync_dir(&self, path: &Path) -> Result<(), StoreError>;
}

/// Production writer using real filesystem operations.
#[derive(Clone)]
pub struct FsStoreWriter;

impl StoreWriter for FsStoreWriter {
    fn write_tmp(&self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn fsync_file(&self, path: &Path) -> Result<(), StoreError> {
        let file = File::open(path)?;
        file.sync_all()?;
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError> {
        std::fs::rename(from, to)?;
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), StoreError> {
        let dir = File::open(path)?;
        dir.sync_all()?;
        Ok(())
    }
}

/// On-disk snapshot of all sessions.
#[derive(Debug, Serialize, Deserialize)]
struct StoreSnapshot {
    v: u32,
    sessions: Vec<Session>,
    saved_at: DateTime<Utc>,
}

/// Durable KV store of sessions with status and correlation indexes.
pub struct SessionStore<W: StoreWriter = FsStoreWriter> {
    writer: W,
    path: PathBuf,
    sessions: HashMap<SessionId, Session>,
    /// Correlation id → owning session, rebuilt on load.
    by_correlation: HashMap<CorrelationId, SessionId>,
}

impl SessionStore<FsStoreWriter> {
    /// Open the store at the given path, loading any existing snapshot.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::open_with_writer(FsStoreWriter, path)
    }
}

impl<W: StoreWriter> SessionStore<W> {
    /// Open with a custom writer (for testing).
    ///
    /// A corrupt snapshot is rotated to `.bak` and the store starts empty; a
    /// snapshot from a newer format version is an error rather than silent
    /// data loss.
    pub fn open_with_writer(writer: W, path: &Path) -> Result<Self, StoreError> {
        let sessions = match Self::load_snapshot(path)? {
            Some(snapshot) => snapshot
                .sessions
                .into_iter()
                .map(|s| (s.id.clone(), s))
                .collect(),
            None => HashMap::new(),
        };

        let mut store = Self {
            writer,
            path: path.to_owned(),
            sessions,
            by_correlation: HashMap::new(),
        };
        store.rebuild_correlations();
        Ok(store)
    }

    fn load_snapshot(path: &Path) -> Result<Option<StoreSnapshot>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }

        let file = File::open(path)?;
        let decoder = zstd::stream::read::Decoder::new(file)
            .map_err(|e| StoreError::Compress(e.to_string()))?;

        let snapshot: StoreSnapshot = match serde_json::from_reader(decoder) {
            Ok(s) => s,
            Err(e) => {
                let bak_path = crate::rotate_bak_path(path);
                warn!(
                    error = %e,
                    path = %path.display(),
                    bak = %bak_path.display(),
                    "Corrupt session snapshot, moving to .bak and starting fresh",
                );
                std::fs::rename(path, &bak_path)?;
                return Ok(None);
            }
        };

        if snapshot.v > CURRENT_STORE_VERSION {
            return Err(StoreError::TooNew(snapshot.v, CURRENT_STORE_VERSION));
        }
        Ok(Some(snapshot))
    }

    fn rebuild_correlations(&mut self) {
        self.by_correlation.clear();
        for session in self.sessions.values() {
            for correlation in session.correlations.keys() {
                self.by_correlation
                    .insert(correlation.clone(), session.id.clone());
            }
        }
    }

    /// Create a new session. The id must be unused.
    pub fn create(&mut self, session: Session) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session.id) {
            return Err(StoreError::Exists(session.id));
        }
        self.sessions.insert(session.id.clone(), session);
        self.persist()
    }

    /// Fetch a session by id.
    pub fn get(&self, id: &SessionId) -> Option<Session> {
        self.sessions.get(id).cloned()
    }

    /// All sessions, newest first.
    pub fn list(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        sessions
    }

    /// Sessions with the given status, newest first.
    pub fn list_by_status(&self, status: SessionStatus) -> Vec<Session> {
        self.list()
            .into_iter()
            .filter(|s| s.status == status)
            .collect()
    }

    /// Session owning the given correlation id.
    pub fn find_by_correlation(&self, correlation: &CorrelationId) -> Option<Session> {
        self.by_correlation
            .get(correlation)
            .and_then(|id| self.sessions.get(id))
            .cloned()
    }

    /// Compare-and-swap update.
    ///
    /// `session.version` must match the stored version; on success the
    /// version is bumped and the snapshot persisted. Returns the new version.
    pub fn update(&mut self, mut session: Session) -> Result<u64, StoreError> {
        let current = self
            .sessions
            .get(&session.id)
            .ok_or_else(|| StoreError::NotFound(session.id.clone()))?;

        if current.is_sealed() {
            return Err(StoreError::Sealed(session.id));
        }
        if current.version != session.version {
            return Err(StoreError::VersionConflict {
                id: session.id,
                expected: current.version,
                actual: session.version,
            });
        }

        session.version += 1;
        let version = session.version;
        for correlation in session.correlations.keys() {
            self.by_correlation
                .insert(correlation.clone(), session.id.clone());
        }
        self.sessions.insert(session.id.clone(), session);
        self.persist()?;
        Ok(version)
    }

    /// Seal a session: stamp `sealed_at_ms` and make it immutable.
    ///
    /// Sealing requires a terminal status and is idempotent.
    pub fn seal(&mut self, id: &SessionId, at_ms: u64) -> Result<(), StoreError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        if session.is_sealed() {
            return Ok(());
        }
        debug_assert!(session.status.is_terminal());
        session.sealed_at_ms = Some(at_ms);
        self.persist()
    }

    /// Remove sealed sessions, returning how many were dropped.
    pub fn drop_sealed(&mut self) -> Result<usize, StoreError> {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| !s.is_sealed());
        let dropped = before - self.sessions.len();
        if dropped > 0 {
            self.rebuild_correlations();
            self.persist()?;
        }
        Ok(dropped)
    }

    /// Non-terminal sessions eligible for re-activation after a restart.
    ///
    /// In-flight subtasks are owned by workers that no longer exist in a
    /// fresh process, so they are promoted back to `ready` here; pending and
    /// ready subtasks replay as-is.
    pub fn resumable(&mut self) -> Result<Vec<Session>, StoreError> {
        let mut resumed = Vec::new();
        let ids: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| !s.status.is_terminal())
            .map(|s| s.id.clone())
            .collect();

        for id in ids {
            if let Some(session) = self.sessions.get_mut(&id) {
                let orphaned: Vec<_> = session
                    .graph
                    .iter()
                    .filter(|s| s.state == SubtaskState::InFlight)
                    .map(|s| s.id)
                    .collect();
                for subtask_id in orphaned {
                    session.graph.mark_retry(subtask_id);
                }
                resumed.push(session.clone());
            }
        }

        if !resumed.is_empty() {
            self.persist()?;
        }
        Ok(resumed)
    }

    /// Write the snapshot durably: tmp → fsync file → rename → fsync dir.
    fn persist(&mut self) -> Result<(), StoreError> {
        let snapshot = StoreSnapshot {
            v: CURRENT_STORE_VERSION,
            sessions: self.sessions.values().cloned().collect(),
            saved_at: Utc::now(),
        };

        let json_bytes = serde_json::to_vec(&snapshot)?;
        // zstd level 3 is a good balance of speed and compression
        let compressed = zstd::encode_all(json_bytes.as_slice(), 3)
            .map_err(|e| StoreError::Compress(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        self.writer.write_tmp(&tmp_path, &compressed)?;
        self.writer.fsync_file(&tmp_path)?;
        self.writer.rename(&tmp_path, &self.path)?;
        if let Some(parent) = self.path.parent() {
            self.writer.fsync_dir(parent)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_store_tests.rs"]
mod tests;
