// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! hive-adapters: boundaries to the outside world.
//!
//! Everything the runtime touches beyond its own process lives behind a
//! trait here: the LLM backend, the GPU vendor tools, and the artifact
//! writer. Fakes for the traits ship behind the `test-support` feature.

pub mod artifact;
pub mod backend;
pub mod gpu;
pub mod subprocess;

pub use artifact::{ArtifactError, ArtifactWriter};
pub use backend::{BackendError, ChatMessage, ChatRole, LlmBackend, OllamaBackend};
pub use gpu::{GpuMonitor, GpuProbe, ProbeError, WatchHandle};

#[cfg(any(test, feature = "test-support"))]
pub use backend::{BackendCall, FakeBackend};
#[cfg(any(test, feature = "test-support"))]
pub use gpu::FakeGpuProbe;
