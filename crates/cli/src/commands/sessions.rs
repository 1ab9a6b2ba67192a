// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hive sessions list|show|cancel`

use crate::table::{Column, Table};
use crate::{env, exit};
use clap::Subcommand;
use hive_core::{SessionId, SessionStatus};
use hive_engine::runtime::StatePaths;
use hive_storage::SessionStore;

#[derive(Subcommand)]
pub enum SessionsCommand {
    /// List stored sessions
    List,

    /// Show one session with its subtasks
    Show {
        /// Session id (or unique prefix)
        id: String,
    },

    /// Mark a running session cancelled
    Cancel {
        /// Session id (or unique prefix)
        id: String,
    },
}

fn open_store() -> Result<SessionStore, String> {
    let state_dir = env::state_dir()?;
    let paths = StatePaths::new(state_dir);
    SessionStore::open(&paths.sessions()).map_err(|e| format!("cannot open session store: {e}"))
}

/// Resolve an id argument, accepting any unambiguous prefix.
fn resolve_id(store: &SessionStore, raw: &str) -> Result<SessionId, String> {
    let matches: Vec<SessionId> = store
        .list()
        .into_iter()
        .map(|s| s.id)
        .filter(|id| id.as_str().starts_with(raw))
        .collect();
    match matches.len() {
        0 => Err(format!("no session matches '{raw}'")),
        1 => Ok(matches.into_iter().next().unwrap_or_else(|| SessionId::new(raw))),
        n => Err(format!("'{raw}' is ambiguous ({n} matches)")),
    }
}

pub fn execute(command: SessionsCommand) -> i32 {
    match command {
        SessionsCommand::List => list(),
        SessionsCommand::Show { id } => show(&id),
        SessionsCommand::Cancel { id } => cancel(&id),
    }
}

fn list() -> i32 {
    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };

    let mut table = Table::new(vec![
        Column::left("ID"),
        Column::left("STATUS"),
        Column::left("ARCH"),
        Column::right("SUBTASKS"),
        Column::capped("TASK", 48),
    ]);
    for session in store.list() {
        table.row(vec![
            session.id.to_string(),
            session.status.to_string(),
            session.architecture.to_string(),
            session.graph.len().to_string(),
            session.task.clone(),
        ]);
    }

    if table.is_empty() {
        println!("no sessions");
    } else {
        print!("{}", table.render());
    }
    exit::OK
}

fn show(raw_id: &str) -> i32 {
    let store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };
    let session = match resolve_id(&store, raw_id).map(|id| store.get(&id)) {
        Ok(Some(session)) => session,
        Ok(None) | Err(_) => {
            eprintln!("error: no session matches '{raw_id}'");
            return exit::USAGE;
        }
    };

    println!("session:      {}", session.id);
    println!("status:       {}", session.status);
    println!("architecture: {}", session.architecture);
    println!("task:         {}", session.task);
    if let Some(timing) = &session.timing {
        println!(
            "timing:       {} subtasks, mean wait {}ms, {}ms total",
            timing.subtasks, timing.mean_wait_ms, timing.elapsed_ms
        );
    }
    for warning in &session.warnings {
        println!("warning:      {warning}");
    }

    if !session.graph.is_empty() {
        println!();
        let mut table = Table::new(vec![
            Column::left("SUBTASK"),
            Column::left("STATE"),
            Column::left("ROLE"),
            Column::right("TRIES"),
            Column::capped("TEXT", 60),
        ]);
        for subtask in session.graph.iter() {
            table.row(vec![
                subtask.id.to_string(),
                subtask.state.to_string(),
                subtask
                    .required_role
                    .map(|r| r.to_string())
                    .unwrap_or_default(),
                subtask.attempts.to_string(),
                subtask.text.clone(),
            ]);
        }
        print!("{}", table.render());
    }

    if let Some(result) = &session.result {
        println!();
        println!("{result}");
    } else if let Some(summary) = session.error_summary() {
        println!();
        println!("error: {summary}");
    }
    exit::OK
}

fn cancel(raw_id: &str) -> i32 {
    let mut store = match open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };

    let id = match resolve_id(&store, raw_id) {
        Ok(id) => id,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::USAGE;
        }
    };
    let Some(mut session) = store.get(&id) else {
        eprintln!("error: no session matches '{raw_id}'");
        return exit::USAGE;
    };

    if session.status.is_terminal() {
        eprintln!("session {id} is already {}", session.status);
        return exit::OK;
    }

    session.status = SessionStatus::Cancelled;
    let now_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    let sealed = match store.update(session) {
        Ok(_) => store.seal(&id, now_ms),
        Err(e) => Err(e),
    };
    if let Err(e) = sealed {
        eprintln!("error: {e}");
        return exit::INTERNAL;
    }
    println!("session {id} cancelled");
    exit::OK
}
