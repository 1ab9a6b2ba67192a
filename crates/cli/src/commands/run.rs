// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `hive run <task>` - the main entry point.

use crate::{env, exit};
use clap::Args;
use fs2::FileExt;
use hive_adapters::{GpuMonitor, LlmBackend, OllamaBackend};
use hive_core::{Architecture, AutoscaleConfig, HiveConfig, SessionStatus, Strategy};
use hive_engine::runtime::prepare_state_dir;
use hive_engine::HiveRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Args)]
pub struct RunArgs {
    /// The task to orchestrate
    pub task: String,

    /// Initial worker count
    #[arg(long)]
    pub workers: Option<usize>,

    /// Coordination architecture: hierarchical, centralized or mesh
    #[arg(long)]
    pub arch: Option<String>,

    /// Model passed through to the backend
    #[arg(long)]
    pub model: Option<String>,

    /// Folder file-save directives are confined to
    #[arg(long)]
    pub project_folder: Option<PathBuf>,

    /// Enable the autoscaler
    #[arg(long)]
    pub auto_scaling: bool,

    /// Autoscaling strategy: gpu-memory, workload, hybrid, conservative
    /// or aggressive
    #[arg(long)]
    pub strategy: Option<String>,

    /// Autoscaler lower fleet bound
    #[arg(long)]
    pub min_agents: Option<usize>,

    /// Autoscaler upper fleet bound (default: derived from GPU memory)
    #[arg(long)]
    pub max_agents: Option<usize>,
}

/// Merge flags over environment values over built-in defaults.
fn build_config(args: &RunArgs) -> Result<HiveConfig, String> {
    let mut config = HiveConfig::default();

    if let Some(model) = env::default_model() {
        config.model = model;
    }
    if let Some(workers) = env::default_workers() {
        config.workers = workers;
    }
    if let Some(arch) = env::default_arch() {
        config.architecture = arch.parse::<Architecture>()?;
    }
    if let Some(folder) = env::project_folder() {
        config.project_folder = Some(folder);
    }
    if let Some(url) = env::backend_url() {
        config.backend_url = url;
    }
    if let Some(capacity) = env::inbox_capacity() {
        config.inbox_capacity = capacity;
    }
    if let Some(timeout) = env::call_timeout_ms() {
        config.call_timeout_ms = timeout;
    }

    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(arch) = &args.arch {
        config.architecture = arch.parse::<Architecture>()?;
    }
    if let Some(folder) = &args.project_folder {
        config.project_folder = Some(folder.clone());
    }

    if args.auto_scaling {
        let mut autoscale = AutoscaleConfig::default();
        if let Some(strategy) = &args.strategy {
            autoscale.strategy = strategy.parse::<Strategy>()?;
        }
        if let Some(min) = args.min_agents {
            autoscale.min_workers = min;
        }
        autoscale.max_workers = args.max_agents;
        if let Some(interval) = env::scale_interval_ms() {
            autoscale.interval_ms = interval;
        }
        config.autoscale = Some(autoscale);
    } else if args.strategy.is_some() || args.min_agents.is_some() || args.max_agents.is_some() {
        return Err("--strategy/--min-agents/--max-agents require --auto-scaling".to_string());
    }

    Ok(config)
}

/// The backend must be reachable and serving the requested model.
async fn check_backend(backend: &OllamaBackend, model: &str) -> Result<(), String> {
    let models = backend
        .list_models()
        .await
        .map_err(|e| format!("backend unavailable: {e}"))?;

    let served = models
        .iter()
        .any(|m| m == model || m.starts_with(&format!("{model}:")));
    if !served {
        return Err(format!(
            "model '{model}' is not served by the backend (available: {})",
            models.join(", ")
        ));
    }
    Ok(())
}

pub async fn execute(args: RunArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::USAGE;
        }
    };

    let state_dir = match env::state_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };
    let paths = match prepare_state_dir(&state_dir) {
        Ok(paths) => paths,
        Err(e) => {
            eprintln!("error: cannot prepare state dir: {e}");
            return exit::INTERNAL;
        }
    };

    // One orchestrator per state directory.
    let lock_file = match std::fs::File::create(paths.lock_file()) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("error: cannot open lock file: {e}");
            return exit::INTERNAL;
        }
    };
    if lock_file.try_lock_exclusive().is_err() {
        eprintln!("error: another hive process owns {}", state_dir.display());
        return exit::INTERNAL;
    }

    let backend = OllamaBackend::new(config.backend_url.clone(), config.call_timeout());
    if let Err(e) = check_backend(&backend, &config.model).await {
        eprintln!("error: {e}");
        return exit::BACKEND_UNAVAILABLE;
    }

    let gpu = Arc::new(GpuMonitor::new());
    let runtime = match HiveRuntime::open(&paths, backend, gpu, config, hive_core::SystemClock) {
        Ok(runtime) => Arc::new(runtime),
        Err(e) => {
            eprintln!("error: {e}");
            return exit::INTERNAL;
        }
    };

    // First ctrl-c cancels gracefully; workers finish their current call.
    let cancel_handle = Arc::clone(&runtime);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling...");
            cancel_handle.cancel();
        }
    });

    info!(task = %args.task, "starting session");
    let session = match runtime.run_task(&args.task).await {
        Ok(session) => session,
        Err(e) => {
            eprintln!("error: {e}");
            let _ = runtime.shutdown().await;
            return exit::INTERNAL;
        }
    };
    if let Err(e) = runtime.shutdown().await {
        eprintln!("warning: shutdown incomplete: {e}");
    }

    match session.status {
        SessionStatus::Completed => {
            if let Some(result) = &session.result {
                println!("{result}");
            }
            for warning in &session.warnings {
                eprintln!("warning: {warning}");
            }
            exit::OK
        }
        SessionStatus::Failed => {
            let summary = session
                .error_summary()
                .unwrap_or_else(|| "task failed".to_string());
            eprintln!("error: {summary}");
            exit::TASK_FAILED
        }
        SessionStatus::Cancelled => {
            eprintln!("session {} cancelled", session.id);
            exit::TASK_FAILED
        }
        SessionStatus::Running => {
            eprintln!("error: session did not reach a terminal state");
            exit::INTERNAL
        }
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
