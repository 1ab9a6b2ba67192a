// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Artifact writer.
//!
//! Workers materialize generated code when the task text carries an explicit
//! `save to <path>` directive. The extraction rule is fixed: the first
//! fenced code block in the LLM response (language tag ignored) is written
//! verbatim. Paths are normalized and must stay inside the configured
//! project folder; only allow-listed extensions are written.

use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Extensions the writer will touch.
const ALLOWED_EXTENSIONS: &[&str] = &[
    "c", "cpp", "css", "csv", "go", "h", "html", "java", "js", "json", "md", "py", "rs", "sh",
    "sql", "toml", "ts", "txt", "yaml", "yml",
];

/// Errors from artifact writes.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("path escapes project folder: {0}")]
    OutsideProject(String),
    #[error("extension not allowed: {0}")]
    DisallowedExtension(String),
    #[error("response has no fenced code block")]
    NoCodeBlock,
}

/// Find an explicit `save to <path>` directive in the task text.
///
/// The path is the token following the directive, with surrounding quotes
/// or backticks and trailing punctuation stripped. Implied paths and
/// multi-block variants are unsupported.
pub fn save_directive(task_text: &str) -> Option<String> {
    let lower = task_text.to_lowercase();
    let at = lower.find("save to ")?;
    let rest = &task_text[at + "save to ".len()..];
    let token = rest.split_whitespace().next()?;
    let cleaned = token
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | '!' | '?'));
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Extract the body of the first fenced code block.
///
/// The opening fence's language tag is ignored; the body is returned
/// verbatim up to the closing fence.
pub fn first_code_block(response: &str) -> Option<&str> {
    let open = response.find("```")?;
    let after_fence = &response[open + 3..];
    // Skip the rest of the fence line (language tag).
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(&body[..close])
}

/// Project-folder-scoped file writer.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    project_folder: PathBuf,
}

impl ArtifactWriter {
    pub fn new(project_folder: impl Into<PathBuf>) -> Self {
        Self {
            project_folder: project_folder.into(),
        }
    }

    /// Normalize a directive path relative to the project folder.
    ///
    /// Absolute paths, parent-dir components and disallowed extensions are
    /// rejected.
    fn resolve(&self, raw: &str) -> Result<PathBuf, ArtifactError> {
        let path = Path::new(raw);
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => normalized.push(part),
                Component::CurDir => {}
                _ => return Err(ArtifactError::OutsideProject(raw.to_string())),
            }
        }
        if normalized.as_os_str().is_empty() {
            return Err(ArtifactError::OutsideProject(raw.to_string()));
        }

        let extension = normalized
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(ArtifactError::DisallowedExtension(extension));
        }

        Ok(self.project_folder.join(normalized))
    }

    /// Write `code` to the directive path, creating parent directories.
    pub fn write(&self, raw_path: &str, code: &str) -> Result<PathBuf, ArtifactError> {
        let target = self.resolve(raw_path)?;
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&target, code)?;
        info!(path = %target.display(), bytes = code.len(), "artifact written");
        Ok(target)
    }

    /// Apply the save heuristic to one task/response pair.
    ///
    /// Returns `Ok(None)` when the task has no directive; a directive with
    /// no code block in the response is an error the worker reports back.
    pub fn maybe_save(
        &self,
        task_text: &str,
        response: &str,
    ) -> Result<Option<PathBuf>, ArtifactError> {
        let Some(raw_path) = save_directive(task_text) else {
            return Ok(None);
        };
        let code = first_code_block(response).ok_or(ArtifactError::NoCodeBlock)?;
        self.write(&raw_path, code).map(Some)
    }
}

#[cfg(test)]
#[path = "artifact_tests.rs"]
mod tests;
