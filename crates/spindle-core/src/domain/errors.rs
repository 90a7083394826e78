//! Errors - エラー型と分類
//!
//! - `FetchError`: MediaFetcher が返す。`ErrorKind` でリトライ可否を分類
//! - `StoreError`: FileStore の I/O エラー
//! - `TransitionError`: TaskRecord の不変条件違反
//! - `SpindleError`: 呼び出し側（HTTP 層）に同期的に返すエラー

use std::path::PathBuf;

use thiserror::Error;

use super::format::FormatKey;
use super::state::TaskState;

/// Classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network hiccup, timeout, throttling: worth another attempt.
    Transient,
    /// Unsupported URL, malformed format, missing binary: retrying is pointless.
    Permanent,
}

/// Failure reported by a `MediaFetcher`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    kind: ErrorKind,
    message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ErrorKind::Transient
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("file store I/O failed on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// A `TaskRecord` mutation that would break its invariants.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("illegal transition {from:?} -> {to:?}")]
    IllegalTransition { from: TaskState, to: TaskState },

    #[error("format {0} was not requested")]
    UnknownFormat(FormatKey),

    #[error("format {0} already has an outcome")]
    DuplicateOutcome(FormatKey),

    #[error("cannot record a format outcome in state {0:?}")]
    NotConverting(TaskState),

    #[error("{0} requested formats have no outcome yet")]
    Unaccounted(usize),
}

/// Errors surfaced synchronously to callers of the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpindleError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Metadata lookup failed after its retries.
    #[error("media unavailable: {0}")]
    Unavailable(String),
}
