// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine error types

use hive_core::SessionId;
use thiserror::Error;

/// Errors that can occur while driving sessions.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("message log error: {0}")]
    Log(#[from] hive_storage::LogError),
    #[error("session store error: {0}")]
    Store(#[from] hive_storage::StoreError),
    #[error("watermark error: {0}")]
    Watermark(#[from] hive_storage::WatermarkError),
    #[error("dispatch error: {0}")]
    Bus(#[from] crate::bus::BusError),
    #[error("backend error: {0}")]
    Backend(#[from] hive_adapters::BackendError),
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
    #[error("no workers available")]
    NoWorkers,
}
