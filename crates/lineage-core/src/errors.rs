//! Structured error types shared across Lineage crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`LineageError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (object ids, paths, versions).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the provenance store and graph engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum LineageError {
    /// Unknown object id or path.
    #[error("not found: {0}")]
    NotFound(ErrorInfo),
    /// A persisted record could not be decoded.
    #[error("corrupt record: {0}")]
    CorruptRecord(ErrorInfo),
    /// The store version is not the one this build operates on.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(ErrorInfo),
    /// No migration path exists from the recorded version.
    #[error("unsupported version: {0}")]
    UnsupportedVersion(ErrorInfo),
    /// A migration step failed; the store stays at the last good version.
    #[error("migration failed: {0}")]
    MigrationFailed(ErrorInfo),
    /// A composite plan (or the provenance graph) would contain a cycle.
    #[error("cyclic composition: {0}")]
    CyclicComposition(ErrorInfo),
    /// A composite link or mapping references something that does not exist.
    #[error("unresolved link: {0}")]
    UnresolvedLink(ErrorInfo),
    /// Another writer holds the store lock.
    #[error("lock contention: {0}")]
    LockContention(ErrorInfo),
    /// A write would violate an immutability or uniqueness invariant.
    #[error("conflict: {0}")]
    Conflict(ErrorInfo),
    /// Caller supplied malformed input.
    #[error("invalid input: {0}")]
    InvalidInput(ErrorInfo),
    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl LineageError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            LineageError::NotFound(info)
            | LineageError::CorruptRecord(info)
            | LineageError::SchemaMismatch(info)
            | LineageError::UnsupportedVersion(info)
            | LineageError::MigrationFailed(info)
            | LineageError::CyclicComposition(info)
            | LineageError::UnresolvedLink(info)
            | LineageError::LockContention(info)
            | LineageError::Conflict(info)
            | LineageError::InvalidInput(info)
            | LineageError::Io(info) => info,
        }
    }

    /// Returns the stable code of the wrapped payload.
    pub fn code(&self) -> &str {
        &self.info().code
    }

    /// Adds a context entry to the wrapped payload, keeping the family.
    pub fn with_context(self, key: impl Into<String>, value: impl ToString) -> Self {
        self.map_info(|info| info.with_context(key, value))
    }

    /// Sets the remediation hint on the wrapped payload, keeping the family.
    pub fn with_hint(self, hint: impl Into<String>) -> Self {
        self.map_info(|info| info.with_hint(hint))
    }

    fn map_info(self, f: impl FnOnce(ErrorInfo) -> ErrorInfo) -> Self {
        match self {
            LineageError::NotFound(info) => LineageError::NotFound(f(info)),
            LineageError::CorruptRecord(info) => LineageError::CorruptRecord(f(info)),
            LineageError::SchemaMismatch(info) => LineageError::SchemaMismatch(f(info)),
            LineageError::UnsupportedVersion(info) => LineageError::UnsupportedVersion(f(info)),
            LineageError::MigrationFailed(info) => LineageError::MigrationFailed(f(info)),
            LineageError::CyclicComposition(info) => LineageError::CyclicComposition(f(info)),
            LineageError::UnresolvedLink(info) => LineageError::UnresolvedLink(f(info)),
            LineageError::LockContention(info) => LineageError::LockContention(f(info)),
            LineageError::Conflict(info) => LineageError::Conflict(f(info)),
            LineageError::InvalidInput(info) => LineageError::InvalidInput(f(info)),
            LineageError::Io(info) => LineageError::Io(f(info)),
        }
    }

    /// Wraps an I/O failure, recording the path it happened on.
    pub fn io(code: &str, path: &std::path::Path, err: std::io::Error) -> Self {
        LineageError::Io(
            ErrorInfo::new(code, err.to_string()).with_context("path", path.display()),
        )
    }
}
