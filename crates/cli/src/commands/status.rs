// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hive status`

use crate::table::{Column, Table};
use crate::{env, exit};
use hive_core::SessionStatus;
use hive_engine::runtime::StatePaths;
use hive_storage::{MessageLog, SessionStore};

pub fn execute() -> i32 {
    let state_dir = match env::state_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };
    let paths = StatePaths::new(&state_dir);

    let store = match SessionStore::open(&paths.sessions()) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: cannot open session store: {e}");
            return exit::INTERNAL;
        }
    };

    let sessions = store.list();
    let count_of = |status: SessionStatus| sessions.iter().filter(|s| s.status == status).count();
    println!("state dir: {}", state_dir.display());
    println!(
        "sessions:  {} total ({} running, {} completed, {} failed, {} cancelled)",
        sessions.len(),
        count_of(SessionStatus::Running),
        count_of(SessionStatus::Completed),
        count_of(SessionStatus::Failed),
        count_of(SessionStatus::Cancelled),
    );

    match MessageLog::open(&paths.messages()) {
        Ok(log) => println!("log:       next seq {}", log.next_seq()),
        Err(e) => println!("log:       unreadable ({e})"),
    }

    // Agents of the most recent session, the last live fleet.
    if let Some(latest) = sessions.first() {
        if !latest.agents.is_empty() {
            println!();
            let mut table = Table::new(vec![
                Column::left("AGENT"),
                Column::left("ROLE"),
                Column::left("STATE"),
            ]);
            for agent in latest.agents.values() {
                table.row(vec![
                    agent.id.to_string(),
                    agent.role.to_string(),
                    agent.state.to_string(),
                ]);
            }
            print!("{}", table.render());
        }
    }
    exit::OK
}
