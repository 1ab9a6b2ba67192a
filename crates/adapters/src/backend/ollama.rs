// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ollama HTTP client.
//!
//! Talks to a local Ollama server (default port 11434) using the
//! non-streaming `/api/chat` endpoint and `/api/tags` for model discovery.

use super::{BackendError, ChatMessage, LlmBackend};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TaggedModel>,
}

#[derive(Deserialize)]
struct TaggedModel {
    name: String,
}

/// Client for an Ollama-style local backend.
#[derive(Clone)]
pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaBackend {
    /// Create a client against `base_url` with a per-call timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> BackendError {
        if err.is_timeout() {
            BackendError::Timeout(self.timeout)
        } else if err.is_connect() {
            BackendError::Unavailable(err.to_string())
        } else {
            BackendError::Transient(err.to_string())
        }
    }
}

/// Map a non-success HTTP status to a backend error.
///
/// Ollama answers 404 with an error body for unknown models; everything else
/// non-2xx is treated as transient and retried by the caller.
fn map_status(status: u16, model: &str, body: &str) -> BackendError {
    if status == 404 {
        BackendError::ModelNotFound(model.to_string())
    } else {
        BackendError::Transient(format!("status {status}: {body}"))
    }
}

/// Extract the reply text from a `/api/chat` response body.
fn parse_chat_body(body: &str) -> Result<String, BackendError> {
    let parsed: ChatResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    Ok(parsed.message.content)
}

/// Extract model names from a `/api/tags` response body.
fn parse_tags_body(body: &str) -> Result<Vec<String>, BackendError> {
    let parsed: TagsResponse =
        serde_json::from_str(body).map_err(|e| BackendError::Malformed(e.to_string()))?;
    Ok(parsed.models.into_iter().map(|m| m.name).collect())
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    async fn chat(&self, model: &str, messages: &[ChatMessage]) -> Result<String, BackendError> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };

        debug!(model, messages = messages.len(), "backend chat call");
        let response = self
            .client
            .post(self.url("/api/chat"))
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !(200..300).contains(&status) {
            return Err(map_status(status, model, &body));
        }
        parse_chat_body(&body)
    }

    async fn list_models(&self) -> Result<Vec<String>, BackendError> {
        let response = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if !(200..300).contains(&status) {
            return Err(BackendError::Unavailable(format!("status {status}")));
        }
        parse_tags_body(&body)
    }
}

#[cfg(test)]
#[path = "ollama_tests.rs"]
mod tests;
