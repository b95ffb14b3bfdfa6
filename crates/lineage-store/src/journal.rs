//! Rename journal making multi-file commits crash-safe.
//!
//! A commit first writes every payload to `tmp/`, then records the planned
//! renames here, then performs them. A journal that survives a crash is
//! replayed by the next writer; renames already applied are skipped.

use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use lineage_core::errors::{ErrorInfo, LineageError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::layout::StoreLayout;

/// One `tmp → final` move, as paths relative to the metadata directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRename {
    /// Scratch file holding the payload.
    pub from: String,
    /// Destination of the payload.
    pub to: String,
}

/// Renames of one in-flight commit, in application order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// When the commit started.
    pub started_at: DateTime<Utc>,
    /// Moves to perform.
    pub renames: Vec<PendingRename>,
}

impl Journal {
    /// Creates an empty journal stamped now.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            renames: Vec::new(),
        }
    }

    /// Durably writes the journal, replacing it atomically.
    pub fn persist(&self, layout: &StoreLayout) -> Result<(), LineageError> {
        let bytes = serde_json::to_vec(self).map_err(|err| {
            LineageError::InvalidInput(ErrorInfo::new("journal-encode", err.to_string()))
        })?;
        let staging = layout.tmp_dir().join("journal.pending");
        write_synced(&staging, &bytes)?;
        let target = layout.journal_path();
        fs::rename(&staging, &target).map_err(|err| LineageError::io("journal-write", &target, err))
    }

    /// Loads the journal left in the metadata directory, if any.
    pub fn load(layout: &StoreLayout) -> Result<Option<Self>, LineageError> {
        let path = layout.journal_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(LineageError::io("journal-read", &path, err)),
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|err| {
            LineageError::CorruptRecord(
                ErrorInfo::new("journal-corrupt", "commit journal could not be decoded")
                    .with_context("path", path.display())
                    .with_context("reason", err),
            )
        })
    }

    /// Applies every rename still outstanding.
    pub fn apply(&self, layout: &StoreLayout) -> Result<usize, LineageError> {
        let mut applied = 0;
        for rename in &self.renames {
            let from = layout.absolute(&rename.from);
            let to = layout.absolute(&rename.to);
            if from.exists() {
                if let Some(parent) = to.parent() {
                    fs::create_dir_all(parent)
                        .map_err(|err| LineageError::io("commit-rename", parent, err))?;
                }
                fs::rename(&from, &to).map_err(|err| LineageError::io("commit-rename", &to, err))?;
                applied += 1;
            } else if !to.exists() {
                return Err(LineageError::CorruptRecord(
                    ErrorInfo::new("journal-incomplete", "journaled payload is missing")
                        .with_context("from", &rename.from)
                        .with_context("to", &rename.to),
                ));
            }
        }
        Ok(applied)
    }

    /// Removes the journal file.
    pub fn clear(layout: &StoreLayout) -> Result<(), LineageError> {
        let path = layout.journal_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(LineageError::io("journal-clear", &path, err)),
        }
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new()
    }
}

/// Replays an interrupted commit and clears scratch files.
///
/// Must run under the exclusive lock. Returns the number of renames applied.
pub fn recover(layout: &StoreLayout) -> Result<usize, LineageError> {
    let mut applied = 0;
    if let Some(journal) = Journal::load(layout)? {
        applied = journal.apply(layout)?;
        Journal::clear(layout)?;
        info!(
            dir = %layout.dir().display(),
            started_at = %journal.started_at,
            renames = journal.renames.len(),
            applied,
            "rolled forward interrupted commit"
        );
    }
    clear_tmp(layout)?;
    Ok(applied)
}

fn clear_tmp(layout: &StoreLayout) -> Result<(), LineageError> {
    let dir = layout.tmp_dir();
    let entries = match fs::read_dir(&dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(LineageError::io("tmp-scan", &dir, err)),
    };
    for entry in entries {
        let entry = entry.map_err(|err| LineageError::io("tmp-scan", &dir, err))?;
        if let Err(err) = fs::remove_file(entry.path()) {
            warn!(path = %entry.path().display(), error = %err, "failed to remove scratch file");
        }
    }
    Ok(())
}

/// Writes `bytes` to `path` and flushes them to stable storage.
pub(crate) fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), LineageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| LineageError::io("tmp-write", parent, err))?;
    }
    let mut file = File::create(path).map_err(|err| LineageError::io("tmp-write", path, err))?;
    file.write_all(bytes)
        .map_err(|err| LineageError::io("tmp-write", path, err))?;
    file.sync_all()
        .map_err(|err| LineageError::io("tmp-sync", path, err))
}
