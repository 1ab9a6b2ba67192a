// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! hive - multi-agent orchestration CLI

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod commands;
mod env;
mod table;

use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use commands::{maintenance, run, sessions, status};

/// Exit codes of the control plane.
pub(crate) mod exit {
    pub const OK: i32 = 0;
    pub const USAGE: i32 = 1;
    pub const TASK_FAILED: i32 = 2;
    pub const BACKEND_UNAVAILABLE: i32 = 3;
    pub const INTERNAL: i32 = 4;
}

#[derive(Parser)]
#[command(
    name = "hive",
    version,
    about = "hive - orchestrate a task across a fleet of local LLM agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task across a worker fleet
    Run(run::RunArgs),

    /// Inspect or cancel sessions
    Sessions {
        #[command(subcommand)]
        command: sessions::SessionsCommand,
    },

    /// Show stored sessions and log statistics
    Status,

    /// Cancel every non-terminal session so nothing resumes later
    StopAgents,

    /// Prune the message log and drop sealed sessions
    Cleanup,
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => exit::OK,
                _ => exit::USAGE,
            };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    setup_logging();

    let code = match cli.command {
        Commands::Run(args) => run::execute(args).await,
        Commands::Sessions { command } => sessions::execute(command),
        Commands::Status => status::execute(),
        Commands::StopAgents => maintenance::stop_agents(),
        Commands::Cleanup => maintenance::cleanup(),
    };
    std::process::exit(code);
}

/// Structured logs to stderr; `HIVE_LOG` overrides the filter.
fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_env("HIVE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
