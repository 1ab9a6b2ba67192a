// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fake LLM backend for deterministic testing
#![cfg_attr(coverage_nightly, coverage(off))]

use super::{BackendError, ChatMessage, LlmBackend};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Recorded call to FakeBackend
#[derive(Debug, Clone)]
pub struct BackendCall {
    pub model: String,
    /// Rendered conversation: every message's content joined by newlines.
    pub prompt: String,
}

/// Scripted reply bucket keyed by a prompt substring.
struct Script {
    pattern: String,
    replies: VecDeque<Result<String, BackendError>>,
}

struct FakeBackendState {
    scripts: Vec<Script>,
    default_reply: String,
    models: Vec<String>,
    list_error: Option<BackendError>,
    calls: Vec<BackendCall>,
    delays: Vec<(String, std::time::Duration)>,
}

/// Fake backend for testing.
///
/// Replies are scripted per prompt substring, consumed FIFO per pattern;
/// prompts matching no scripted pattern get the default reply. All calls are
/// recorded.
#[derive(Clone)]
pub struct FakeBackend {
    inner: Arc<Mutex<FakeBackendState>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(FakeBackendState {
                scripts: Vec::new(),
                default_reply: "ok".to_string(),
                models: vec!["llama3".to_string()],
                list_error: None,
                calls: Vec::new(),
                delays: Vec::new(),
            })),
        }
    }

    /// Queue a reply for prompts containing `pattern`.
    pub fn reply_containing(&self, pattern: impl Into<String>, reply: impl Into<String>) {
        self.push_script(pattern.into(), Ok(reply.into()));
    }

    /// Queue an error for prompts containing `pattern`.
    pub fn fail_containing(&self, pattern: impl Into<String>, error: BackendError) {
        self.push_script(pattern.into(), Err(error));
    }

    fn push_script(&self, pattern: String, reply: Result<String, BackendError>) {
        let mut inner = self.inner.lock();
        if let Some(script) = inner.scripts.iter_mut().find(|s| s.pattern == pattern) {
            script.replies.push_back(reply);
        } else {
            inner.scripts.push(Script {
                pattern,
                replies: VecDeque::from([reply]),
            });
        }
    }

    /// Reply for prompts that match no scripted pattern.
    pub fn set_default_reply(&self, reply: impl Into<String>) {
        self.inner.lock().default_reply = reply.into();
    }

    /// Delay replies to prompts containing `pattern`, to keep a call
    /// observably in flight.
    pub fn delay_containing(&self, pattern: impl Into<String>, delay: std::time::Duration) {
        self.inner.lock().delays.push((pattern.into(), delay));
    }

    /// Models reported by `list_models`.
    pub fn set_models(&self, models: Vec<String>) {
        self.inner.lock().models = models;
    }

    /// Error returned by the next `list_models` calls.
    pub fn set_list_error(&self, error: BackendError) {
        self.inner.lock().list_error = Some(error);
    }

    /// All recorded calls.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.inner.lock().calls.clone()
    }

    /// Number of chat calls made.
    pub fn call_count(&self) -> usize {
        self.inner.lock().calls.len()
    }

    /// Calls whose prompt contains `pattern`.
    pub fn calls_containing(&self, pattern: &str) -> usize {
        self.inner
            .lock()
            .calls
            .iter()
            .filter(|c| c.prompt.contains(pattern))
            .count()
    }
}

#[async_trait]
impl LlmBackend for FakeBackend {
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, BackendError> {
        let prompt: String = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let delay = {
            let inner = self.inner.lock();
            inner
                .delays
                .iter()
                .find(|(pattern, _)| prompt.contains(pattern))
                .map(|(_, delay)| *delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.inner.lock();
        inner.calls.push(BackendCall {
            model: model.to_string(),
            prompt: prompt.clone(),
        });

        for script in inner.scripts.iter_mut() {
            if prompt.contains(&script.pattern) {
                if let Some(reply) = script.replies.pop_front() {
                    return reply;
                }
            }
        }
        Ok(inner.default_reply.clone())
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.list_error.take() {
            return Err(error);
        }
        Ok(inner.models.clone())
    }
}

#[cfg(test)]
#[path = "fake_tests.rs"]
mod tests;
