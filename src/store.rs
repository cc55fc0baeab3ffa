//! Deduplicated, ordered message history with optional JSON persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::message_key;
use crate::{NormalizedMessage, Provider, Result};

const HISTORY_VERSION: u32 = 1;

/// Session message history.
///
/// Messages are kept in first-seen order and are never removed or reordered, even when
/// a later provider snapshot no longer contains them.
#[derive(Debug, Default)]
pub struct MessageStore {
    messages: Vec<NormalizedMessage>,
    seen: HashSet<String>,
    file: Option<HistoryFile>,
    /// Entries saved by earlier runs, written back ahead of this session's messages.
    earlier: Vec<NormalizedMessage>,
    max_entries: usize,
    persist_failures: usize,
}

impl MessageStore {
    /// In-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rewrites `file` whenever new messages arrive.
    ///
    /// Entries already in `file` are kept, and the file holds at most `max_entries`
    /// messages, dropping the oldest first. An unreadable file is logged and replaced on
    /// the first write.
    pub fn persistent(file: HistoryFile, max_entries: usize) -> Self {
        let earlier = file.read().unwrap_or_else(|e| {
            tracing::warn!(
                path = %file.path().display(),
                error = %e,
                "cannot read saved history, starting a new one"
            );
            Vec::new()
        });
        Self {
            file: Some(file),
            earlier,
            max_entries,
            ..Self::default()
        }
    }

    /// Record the unseen messages of `snapshot` and return them in snapshot order.
    ///
    /// Re-absorbing a snapshot is a no-op. When persistence is enabled and something new
    /// arrived, the full history is written out; a failed write is logged and counted but
    /// never loses the returned messages.
    pub fn absorb(&mut self, snapshot: Vec<NormalizedMessage>) -> Vec<NormalizedMessage> {
        let mut fresh = Vec::new();
        for message in snapshot {
            if self.seen.insert(message.key()) {
                self.messages.push(message.clone());
                fresh.push(message);
            }
        }

        if !fresh.is_empty() {
            if let Err(e) = self.flush() {
                self.persist_failures += 1;
                tracing::warn!(error = %e, "failed to persist message history");
            }
        }

        fresh
    }

    /// This session's history in first-seen order.
    pub fn history(&self) -> &[NormalizedMessage] {
        &self.messages
    }

    /// Whether a message with this id was already recorded for `mailbox`.
    pub fn contains(&self, provider: Provider, mailbox: &str, id: &str) -> bool {
        self.seen.contains(&message_key(provider, mailbox, id))
    }

    /// Number of history writes that failed this session.
    pub fn persist_failures(&self) -> usize {
        self.persist_failures
    }

    /// Write earlier entries plus this session's history to the backing file, if any.
    pub fn flush(&self) -> Result<()> {
        match &self.file {
            Some(file) => file.write(&self.saved_entries()),
            None => Ok(()),
        }
    }

    fn saved_entries(&self) -> Vec<NormalizedMessage> {
        let mut entries: Vec<NormalizedMessage> = self
            .earlier
            .iter()
            .filter(|m| !self.seen.contains(&m.key()))
            .chain(&self.messages)
            .cloned()
            .collect();
        let excess = entries.len().saturating_sub(self.max_entries);
        entries.drain(..excess);
        entries
    }
}

/// The persisted history document.
#[derive(Debug, Serialize, Deserialize)]
struct HistoryDocument {
    version: u32,
    updated_at: DateTime<Utc>,
    messages: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HistoryEntry {
    /// Provider-qualified id.
    key: String,
    #[serde(flatten)]
    message: NormalizedMessage,
}

/// JSON history file, overwritten wholesale on every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryFile {
    path: PathBuf,
}

impl HistoryFile {
    /// History stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the file contents with `messages`.
    ///
    /// Writes a sibling temporary file and renames it over the target so readers never see
    /// a partially written document.
    pub fn write(&self, messages: &[NormalizedMessage]) -> Result<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let document = HistoryDocument {
            version: HISTORY_VERSION,
            updated_at: Utc::now(),
            messages: messages
                .iter()
                .map(|m| HistoryEntry {
                    key: m.key(),
                    message: m.clone(),
                })
                .collect(),
        };

        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&document)?)?;
        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), count = messages.len(), "history written");
        Ok(())
    }

    /// Read the saved history. A missing file reads as empty.
    pub fn read(&self) -> Result<Vec<NormalizedMessage>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let document: HistoryDocument = serde_json::from_slice(&raw)?;
        Ok(document.messages.into_iter().map(|e| e.message).collect())
    }

    /// Delete the file. Returns `false` when there was nothing to delete.
    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
