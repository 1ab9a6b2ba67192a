// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL message log with group commit support.
//!
//! Every message sent over the dispatch bus is appended here before it is
//! enqueued, so the log order is the canonical global order and inboxes can
//! be rebuilt after a restart by replaying from per-receiver watermarks.
//! Group commit batches writes (~10ms) for performance.
//!
//! Each entry is a single line of JSON: the message record with its assigned
//! sequence number.

use hive_core::{CorrelationId, Message};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

/// Flush interval for group commit (~10ms batches)
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

/// Maximum entries to buffer before forcing flush
const FLUSH_THRESHOLD: usize = 100;

/// Errors that can occur in message log operations
#[derive(Debug, Error)]
pub enum LogError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Optional read-side filters; empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub receiver: Option<hive_core::AgentId>,
    pub correlation: Option<CorrelationId>,
}

impl MessageFilter {
    pub fn receiver(agent: impl Into<hive_core::AgentId>) -> Self {
        Self {
            receiver: Some(agent.into()),
            ..Default::default()
        }
    }

    pub fn correlation(correlation: impl Into<CorrelationId>) -> Self {
        Self {
            correlation: Some(correlation.into()),
            ..Default::default()
        }
    }

    fn matches(&self, message: &Message) -> bool {
        if let Some(receiver) = &self.receiver {
            if message.receiver != *receiver {
                return false;
            }
        }
        if let Some(correlation) = &self.correlation {
            if message.correlation != *correlation {
                return false;
            }
        }
        true
    }
}

/// Append-only JSONL store for inter-agent messages.
///
/// Appends are buffered in memory and flushed to disk either when
/// `needs_flush()` reports true (interval elapsed or buffer full) or
/// explicitly via `flush()`, which is the durability point. Writes are
/// serialized by requiring `&mut self`; readers work from the durable file
/// and never block the writer.
pub struct MessageLog {
    file: File,
    path: PathBuf,
    /// Next sequence number to assign
    next_seq: u64,
    /// Buffered JSON lines waiting to be flushed (without trailing newline)
    write_buffer: Vec<Vec<u8>>,
    /// Last flush timestamp for interval checking
    last_flush: Instant,
}

impl MessageLog {
    /// Open or create a message log at the given path.
    ///
    /// Scans the file to find the highest assigned sequence. A corrupt tail
    /// is rotated to `.bak` with the valid prefix preserved, so a crash mid
    /// write never poisons the log.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;

        let (mut max_seq, corrupt) = Self::scan(&file)?;

        if corrupt {
            let valid_lines = Self::read_valid_lines(&file)?;
            drop(file);

            let bak_path = crate::rotate_bak_path(path);
            warn!(
                path = %path.display(),
                bak = %bak_path.display(),
                valid_entries = valid_lines.len(),
                "Corrupt message log detected, rotating to .bak and preserving valid entries",
            );
            std::fs::rename(path, &bak_path)?;

            {
                let mut new_file = File::create(path)?;
                for line in &valid_lines {
                    new_file.write_all(line.as_bytes())?;
                    new_file.write_all(b"\n")?;
                }
                new_file.sync_all()?;
            }

            file = OpenOptions::new()
                .create(true)
                .read(true)
                .append(true)
                .open(path)?;
            max_seq = Self::scan(&file)?.0;
        }

        Ok(Self {
            file,
            path: path.to_owned(),
            next_seq: max_seq + 1,
            write_buffer: Vec::new(),
            last_flush: Instant::now(),
        })
    }

    /// Scan the log for the maximum sequence number.
    ///
    /// Returns `(max_seq, corrupt)` where `corrupt` is true if a parse error
    /// was encountered (not just EOF).
    fn scan(file: &File) -> Result<(u64, bool), LogError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut max_seq = 0u64;
        let mut corrupt = false;
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    corrupt = true;
                    break;
                }
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Message = match serde_json::from_str(trimmed) {
                Ok(m) => m,
                Err(_) => {
                    corrupt = true;
                    break;
                }
            };
            max_seq = max_seq.max(message.seq);
        }

        Ok((max_seq, corrupt))
    }

    /// Read all valid (parseable) lines, stopping at the first corrupt entry.
    fn read_valid_lines(file: &File) -> Result<Vec<String>, LogError> {
        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut valid_lines = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            if serde_json::from_str::<Message>(trimmed).is_err() {
                break;
            }
            valid_lines.push(trimmed.to_string());
        }

        Ok(valid_lines)
    }

    /// Append a message, assigning the next sequence number.
    ///
    /// Returns the stamped message. The entry is NOT durable until `flush()`
    /// runs; a reader never observes a partial record because flush writes
    /// whole lines.
    pub fn append(&mut self, mut message: Message) -> Result<Message, LogError> {
        message.seq = self.next_seq;
        self.next_seq += 1;
        let json_bytes = serde_json::to_vec(&message)?;
        self.write_buffer.push(json_bytes);
        Ok(message)
    }

    /// Check if flush is needed (interval elapsed or buffer full).
    pub fn needs_flush(&self) -> bool {
        !self.write_buffer.is_empty()
            && (self.last_flush.elapsed() >= FLUSH_INTERVAL
                || self.write_buffer.len() >= FLUSH_THRESHOLD)
    }

    /// Flush all buffered entries to disk with a single fsync.
    ///
    /// This is the durability point.
    pub fn flush(&mut self) -> Result<(), LogError> {
        if self.write_buffer.is_empty() {
            return Ok(());
        }

        for mut json_bytes in self.write_buffer.drain(..) {
            json_bytes.push(b'\n');
            self.file.write_all(&json_bytes)?;
        }

        self.file.sync_all()?;
        self.last_flush = Instant::now();
        Ok(())
    }

    /// Sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Read durable records with `seq >= from_seq` in sequence order.
    ///
    /// `limit` of 0 means unlimited. Buffered-but-unflushed entries are not
    /// visible; call `flush()` first when that matters.
    pub fn read(
        &self,
        from_seq: u64,
        limit: usize,
        filter: &MessageFilter,
    ) -> Result<Vec<Message>, LogError> {
        let mut reader = BufReader::new(self.file.try_clone()?);
        reader.seek(SeekFrom::Start(0))?;

        let mut out = Vec::new();
        let mut line = String::new();

        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::InvalidData => break,
                Err(e) => return Err(e.into()),
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let message: Message = match serde_json::from_str(trimmed) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "Corrupt log entry during read, stopping");
                    break;
                }
            };

            if message.seq >= from_seq && filter.matches(&message) {
                out.push(message);
                if limit > 0 && out.len() == limit {
                    break;
                }
            }
        }

        Ok(out)
    }

    /// All durable records with `seq > seq`, for restart replay.
    pub fn entries_after(&self, seq: u64) -> Result<Vec<Message>, LogError> {
        self.read(seq + 1, 0, &MessageFilter::default())
    }

    /// Remove records at or below `up_to_seq`.
    ///
    /// Safe only once no live consumer depends on them; callers gate this on
    /// the minimum receiver watermark. Rewrites the retained suffix to a temp
    /// file and renames atomically.
    pub fn prune(&mut self, up_to_seq: u64) -> Result<(), LogError> {
        self.flush()?;

        let kept = self.read(up_to_seq + 1, 0, &MessageFilter::default())?;
        let tmp_path = self.path.with_extension("tmp");

        {
            let mut tmp_file = File::create(&tmp_path)?;
            for message in &kept {
                let json_bytes = serde_json::to_vec(message)?;
                tmp_file.write_all(&json_bytes)?;
                tmp_file.write_all(b"\n")?;
            }
            tmp_file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)?;

        Ok(())
    }
}

#[cfg(test)]
#[path = "log_tests.rs"]
mod tests;
