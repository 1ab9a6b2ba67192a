// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hive stop-agents` and `hive cleanup`

use crate::{env, exit};
use hive_core::SessionStatus;
use hive_engine::runtime::StatePaths;
use hive_storage::{MessageLog, SessionStore, WatermarkTable};

fn paths() -> Result<StatePaths, String> {
    Ok(StatePaths::new(env::state_dir()?))
}

/// Mark every non-terminal session cancelled so nothing resumes later.
pub fn stop_agents() -> i32 {
    let paths = match paths() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };
    let mut store = match SessionStore::open(&paths.sessions()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: cannot open session store: {e}");
            return exit::INTERNAL;
        }
    };

    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;

    let mut stopped = 0usize;
    for mut session in store.list_by_status(SessionStatus::Running) {
        session.status = SessionStatus::Cancelled;
        let id = session.id.clone();
        let outcome = match store.update(session) {
            Ok(_) => store.seal(&id, now_ms),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => stopped += 1,
            Err(e) => eprintln!("warning: could not cancel {id}: {e}"),
        }
    }

    println!("{stopped} session(s) stopped");
    exit::OK
}

/// Drop sealed sessions and prune the message log below the live watermark.
pub fn cleanup() -> i32 {
    let paths = match paths() {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };

    let mut store = match SessionStore::open(&paths.sessions()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: cannot open session store: {e}");
            return exit::INTERNAL;
        }
    };
    let dropped = match store.drop_sealed() {
        Ok(dropped) => dropped,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };

    let mut log = match MessageLog::open(&paths.messages()) {
        Ok(log) => log,
        Err(e) => {
            eprintln!("error: cannot open message log: {e}");
            return exit::INTERNAL;
        }
    };
    let watermarks = match WatermarkTable::load(&paths.watermarks()) {
        Ok(watermarks) => watermarks,
        Err(e) => {
            eprintln!("error: cannot load watermarks: {e}");
            return exit::INTERNAL;
        }
    };

    // With no live receivers the whole log is prunable.
    let prune_to = watermarks
        .min()
        .unwrap_or_else(|| log.next_seq().saturating_sub(1));
    if prune_to > 0 {
        if let Err(e) = log.prune(prune_to) {
            eprintln!("error: prune failed: {e}");
            return exit::INTERNAL;
        }
    }

    println!("dropped {dropped} sealed session(s), pruned log through seq {prune_to}");
    exit::OK
}
