// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the CLI.
//!
//! Flags beat environment values; environment values beat built-in
//! defaults.

use std::path::PathBuf;

/// Resolve state directory: HIVE_STATE_DIR > XDG_STATE_HOME/hive > ~/.local/state/hive
pub fn state_dir() -> Result<PathBuf, String> {
    if let Ok(dir) = std::env::var("HIVE_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("hive"));
    }
    let home = std::env::var("HOME").map_err(|_| "cannot resolve a state directory: neither HIVE_STATE_DIR nor HOME is set".to_string())?;
    Ok(PathBuf::from(home).join(".local/state/hive"))
}

pub fn default_model() -> Option<String> {
    std::env::var("HIVE_MODEL").ok()
}

pub fn default_workers() -> Option<usize> {
    parsed("HIVE_WORKERS")
}

pub fn default_arch() -> Option<String> {
    std::env::var("HIVE_ARCH").ok()
}

pub fn project_folder() -> Option<PathBuf> {
    std::env::var("HIVE_PROJECT_FOLDER").ok().map(PathBuf::from)
}

pub fn backend_url() -> Option<String> {
    std::env::var("HIVE_BACKEND_URL").ok()
}

pub fn scale_interval_ms() -> Option<u64> {
    parsed("HIVE_SCALE_INTERVAL_MS")
}

pub fn inbox_capacity() -> Option<usize> {
    parsed("HIVE_INBOX_CAPACITY")
}

pub fn call_timeout_ms() -> Option<u64> {
    parsed("HIVE_CALL_TIMEOUT_MS")
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
