// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use hive_core::test_support::test_session;
use hive_core::{SessionId, SessionStatus, SubtaskId};
use parking_lot::Mutex;
use std::sync::Arc;
use tempfile::tempdir;

// =============================================================================
// Fake StoreWriter for testing
// =============================================================================

/// Records all I/O operations for verification.
#[derive(Debug, Clone, Default)]
struct IoLog {
    writes: Vec<PathBuf>,
    fsyncs_file: Vec<PathBuf>,
    renames: Vec<(PathBuf, PathBuf)>,
    fsyncs_dir: Vec<PathBuf>,
}

/// Fake writer that records operations and supports error injection.
#[derive(Clone, Default)]
struct FakeStoreWriter {
    log: Arc<Mutex<IoLog>>,
    fail_fsync_dir: Arc<Mutex<bool>>,
}

impl StoreWriter for FakeStoreWriter {
    fn write_tmp(&self, path: &Path, _data: &[u8]) -> Result<(), StoreError> {
        self.log.lock().writes.push(path.to_owned());
        Ok(())
    }

    fn fsync_file(&self, path: &Path) -> Result<(), StoreError> {
        self.log.lock().fsyncs_file.push(path.to_owned());
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<(), StoreError> {
        self.log.lock().renames.push((from.to_owned(), to.to_owned()));
        Ok(())
    }

    fn fsync_dir(&self, path: &Path) -> Result<(), StoreError> {
        if *self.fail_fsync_dir.lock() {
            return Err(StoreError::Io(std::io::Error::other("injected")));
        }
        self.log.lock().fsyncs_dir.push(path.to_owned());
        Ok(())
    }
}

fn open_store(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::open(&dir.path().join("sessions.snapshot")).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[test]
fn create_get_list() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);

    let mut a = test_session("s-1", "task one");
    a.created_at_ms = 100;
    let mut b = test_session("s-2", "task two");
    b.created_at_ms = 200;
    store.create(a).unwrap();
    store.create(b).unwrap();

    assert!(store.get(&SessionId::new("s-1")).is_some());
    assert!(store.get(&SessionId::new("s-9")).is_none());

    // Newest first.
    let listed = store.list();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, SessionId::new("s-2"));
}

#[test]
fn duplicate_create_is_rejected() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);

    store.create(test_session("s-1", "t")).unwrap();
    let err = store.create(test_session("s-1", "t")).unwrap_err();
    assert!(matches!(err, StoreError::Exists(_)));
}

#[test]
fn update_bumps_version_on_cas_match() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    store.create(test_session("s-1", "t")).unwrap();

    let mut session = store.get(&SessionId::new("s-1")).unwrap();
    session.warnings.push("w".to_string());
    let version = store.update(session).unwrap();
    assert_eq!(version, 1);

    let reread = store.get(&SessionId::new("s-1")).unwrap();
    assert_eq!(reread.version, 1);
    assert_eq!(reread.warnings, vec!["w".to_string()]);
}

#[test]
fn update_with_stale_version_conflicts() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);
    store.create(test_session("s-1", "t")).unwrap();

    let stale = store.get(&SessionId::new("s-1")).unwrap();
    let mut fresh = stale.clone();
    fresh.result = Some("first".into());
    store.update(fresh).unwrap();

    // The stale copy still has version 0.
    let err = store.update(stale).unwrap_err();
    assert!(matches!(err, StoreError::VersionConflict { .. }));
}

#[test]
fn sealed_sessions_reject_mutation() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);

    let mut session = test_session("s-1", "t");
    session.status = SessionStatus::Completed;
    store.create(session).unwrap();
    store.seal(&SessionId::new("s-1"), 999).unwrap();

    let sealed = store.get(&SessionId::new("s-1")).unwrap();
    assert_eq!(sealed.sealed_at_ms, Some(999));

    let err = store.update(sealed).unwrap_err();
    assert!(matches!(err, StoreError::Sealed(_)));

    // Sealing again is a no-op, not an error.
    store.seal(&SessionId::new("s-1"), 1_234).unwrap();
    assert_eq!(
        store.get(&SessionId::new("s-1")).unwrap().sealed_at_ms,
        Some(999)
    );
}

#[test]
fn store_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.snapshot");

    {
        let mut store = SessionStore::open(&path).unwrap();
        let mut session = test_session("s-1", "persisted");
        session.graph.add("sub", None, 0, Default::default(), None);
        store.create(session).unwrap();
    }

    let store = SessionStore::open(&path).unwrap();
    let session = store.get(&SessionId::new("s-1")).unwrap();
    assert_eq!(session.task, "persisted");
    assert_eq!(session.graph.len(), 1);
}

#[test]
fn corrupt_snapshot_rotates_to_bak() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.snapshot");
    std::fs::write(&path, zstd::encode_all(&b"garbage"[..], 3).unwrap()).unwrap();

    let store = SessionStore::open(&path).unwrap();
    assert!(store.list().is_empty());
    assert!(path.with_extension("bak").exists());
}

#[test]
fn too_new_snapshot_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.snapshot");

    let json = format!(
        r#"{{"v": {}, "sessions": [], "saved_at": "2025-01-01T00:00:00Z"}}"#,
        CURRENT_STORE_VERSION + 1
    );
    std::fs::write(&path, zstd::encode_all(json.as_bytes(), 3).unwrap()).unwrap();

    let err = SessionStore::open(&path).unwrap_err();
    assert!(matches!(err, StoreError::TooNew(_, _)));
}

#[test]
fn find_by_correlation_uses_index() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);

    let mut session = test_session("s-1", "t");
    let st = session.graph.add("sub", None, 0, Default::default(), None);
    session
        .correlations
        .insert(hive_core::CorrelationId::new("corr-9"), st);
    store.create(session).unwrap();

    let found = store
        .find_by_correlation(&hive_core::CorrelationId::new("corr-9"))
        .unwrap();
    assert_eq!(found.id, SessionId::new("s-1"));
    assert!(store
        .find_by_correlation(&hive_core::CorrelationId::new("corr-0"))
        .is_none());
}

#[test]
fn resumable_promotes_orphaned_in_flight_to_ready() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.snapshot");

    {
        let mut store = SessionStore::open(&path).unwrap();
        let mut session = test_session("s-1", "t");
        let st = session.graph.add("sub", None, 0, Default::default(), None);
        session.graph.refresh_ready();
        session.graph.mark_in_flight(st, "worker-1".into());
        store.create(session).unwrap();

        let mut done = test_session("s-2", "t");
        done.status = SessionStatus::Completed;
        store.create(done).unwrap();
    }

    let mut store = SessionStore::open(&path).unwrap();
    let resumed = store.resumable().unwrap();
    assert_eq!(resumed.len(), 1);
    assert_eq!(resumed[0].id, SessionId::new("s-1"));

    let subtask = resumed[0].graph.get(SubtaskId(0)).unwrap();
    assert_eq!(subtask.state, hive_core::SubtaskState::Ready);
    assert!(subtask.assigned_to.is_none());
}

#[test]
fn drop_sealed_removes_only_sealed() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);

    let mut sealed = test_session("s-1", "t");
    sealed.status = SessionStatus::Completed;
    store.create(sealed).unwrap();
    store.seal(&SessionId::new("s-1"), 1).unwrap();
    store.create(test_session("s-2", "t")).unwrap();

    assert_eq!(store.drop_sealed().unwrap(), 1);
    assert!(store.get(&SessionId::new("s-1")).is_none());
    assert!(store.get(&SessionId::new("s-2")).is_some());
}

#[test]
fn persist_orders_write_fsync_rename_fsync_dir() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state").join("sessions.snapshot");
    let writer = FakeStoreWriter::default();
    let mut store = SessionStore::open_with_writer(writer.clone(), &path).unwrap();

    store.create(test_session("s-1", "t")).unwrap();

    let log = writer.log.lock().clone();
    assert_eq!(log.writes.len(), 1);
    assert!(log.writes[0].to_string_lossy().ends_with(".tmp"));
    assert_eq!(log.fsyncs_file, log.writes);
    assert_eq!(log.renames.len(), 1);
    assert_eq!(log.renames[0].1, path);
    assert_eq!(log.fsyncs_dir, vec![path.parent().unwrap().to_owned()]);
}

#[test]
fn persist_failure_surfaces_as_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sessions.snapshot");
    let writer = FakeStoreWriter::default();
    *writer.fail_fsync_dir.lock() = true;
    let mut store = SessionStore::open_with_writer(writer, &path).unwrap();

    assert!(store.create(test_session("s-1", "t")).is_err());
}

#[test]
fn list_by_status_filters() {
    let dir = tempdir().unwrap();
    let mut store = open_store(&dir);

    store.create(test_session("s-1", "t")).unwrap();
    let mut completed = test_session("s-2", "t");
    completed.status = SessionStatus::Completed;
    store.create(completed).unwrap();

    assert_eq!(store.list_by_status(SessionStatus::Running).len(), 1);
    assert_eq!(store.list_by_status(SessionStatus::Completed).len(), 1);
    assert!(store.list_by_status(SessionStatus::Failed).is_empty());
}
