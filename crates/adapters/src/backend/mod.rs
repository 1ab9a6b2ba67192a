// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LLM backend abstraction.
//!
//! The backend is a local process exposing a blocking chat call over HTTP.
//! The `LlmBackend` trait is what the rest of the system sees; the Ollama
//! implementation and the test fake both live here.

mod ollama;

pub use ollama::OllamaBackend;

// Test support - only compiled for tests or when explicitly requested
#[cfg(any(test, feature = "test-support"))]
mod fake;
#[cfg(any(test, feature = "test-support"))]
pub use fake::{BackendCall, FakeBackend};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from backend calls.
///
/// Cloneable so fakes can script error sequences.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("transient backend error: {0}")]
    Transient(String),
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed backend reply: {0}")]
    Malformed(String),
}

impl BackendError {
    /// Whether a retry with the same input can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Transient(_) | BackendError::Timeout(_))
    }
}

/// Conversation role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One message in a chat exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A local LLM backend.
#[async_trait]
pub trait LlmBackend: Clone + Send + Sync + 'static {
    /// Submit a chat exchange and return the reply text.
    ///
    /// The call may take seconds and is treated as non-interruptible by
    /// callers; cancellation is observed between calls, not during one.
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, BackendError>;

    /// List the models the backend is serving.
    async fn list_models(&self) -> Result<Vec<String>, BackendError>;
}
