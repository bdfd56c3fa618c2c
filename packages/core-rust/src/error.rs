//! Error taxonomy shared by every ledger operation.
//!
//! All variants are request rejections: none of them is fatal to the process
//! or to the serialization queue. The type is `Clone + PartialEq` so that
//! callers joined on one deduplicated creation receive identical failures.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Storage engine behind a backend adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Embedded document store (one document per record).
    Document,
    /// Relational table keyed by record key.
    Relational,
    /// Single JSON file holding an ordered array of records.
    FlatFile,
    /// Process-local memory, no persistence.
    Memory,
}

impl BackendKind {
    /// Stable lowercase name used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Relational => "relational",
            Self::FlatFile => "flat-file",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by ledger store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("invalid record key: {reason}")]
    InvalidKey { reason: String },
    #[error("invalid secondary key: {reason}")]
    InvalidSecondaryKey { reason: String },
    #[error("invalid status {value:?}")]
    InvalidStatus { value: String },
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("invalid query: {reason}")]
    InvalidQuery { reason: String },
    #[error("invalid update data: {reason}")]
    InvalidUpdateData { reason: String },
    #[error("missing required fields: {}", fields.join(", "))]
    MissingFields { fields: Vec<&'static str> },
    #[error("record {key:?} already exists")]
    AlreadyExists { key: String },
    #[error("record {key:?} not found")]
    NotFound { key: String },
    #[error("no structure at {path:?}")]
    KeyNotFound { path: String },
    #[error("{engine} backend error: {cause}")]
    Backend { engine: BackendKind, cause: String },
    #[error("serialization queue is closed")]
    QueueClosed,
    #[error("queued task aborted before producing a result")]
    TaskAborted,
}

impl StoreError {
    /// Wraps an engine failure, keeping the full cause chain as text.
    pub fn backend(engine: BackendKind, cause: impl fmt::Display) -> Self {
        Self::Backend {
            engine,
            cause: format!("{cause:#}"),
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_update(reason: impl Into<String>) -> Self {
        Self::InvalidUpdateData {
            reason: reason.into(),
        }
    }

    /// Whether the error was raised by argument validation rather than by
    /// store state or the backend.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidKey { .. }
                | Self::InvalidSecondaryKey { .. }
                | Self::InvalidStatus { .. }
                | Self::InvalidPath { .. }
                | Self::InvalidQuery { .. }
                | Self::InvalidUpdateData { .. }
                | Self::MissingFields { .. }
        )
    }
}
