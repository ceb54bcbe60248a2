//! Error types for push orchestration.
//!
//! - `TransferError`: one failed queue item. Never fatal on its own; all of
//!   them are surfaced together once the upload queue drains.
//! - `ResolveError`: a ready pointer could not be turned into a transfer.
//! - `PushError`: anything that ends the push early, with its exit status.

use std::fmt;
use std::io;
use std::path::PathBuf;

pub const USAGE_EXIT_CODE: i32 = 1;
/// Push finished but one or more transfers failed.
pub const PARTIAL_PUSH_EXIT_CODE: i32 = 2;
pub const POINTER_MISMATCH_EXIT_CODE: i32 = 3;
pub const FATAL_EXIT_CODE: i32 = 4;

/// Category of transfer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transient error (network timeout, interrupted write).
    Retryable,
    /// Permanent error (permission denied, corrupt data).
    Fatal,
}

/// A failed queue item.
#[derive(Debug, Clone)]
pub struct TransferError {
    pub message: String,
    /// Working-tree name of the blob, when known.
    pub path: Option<String>,
    pub oid: String,
    pub category: ErrorCategory,
}

impl TransferError {
    pub fn new(
        oid: impl Into<String>,
        path: Option<String>,
        message: impl Into<String>,
        category: ErrorCategory,
    ) -> Self {
        Self {
            message: message.into(),
            path,
            oid: oid.into(),
            category,
        }
    }

    /// Build from an eyre report, categorising by the innermost io error if
    /// there is one.
    pub fn from_report(oid: &str, path: Option<String>, err: &eyre::Report) -> Self {
        let category = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<io::Error>())
            .map(categorize_io_error)
            .unwrap_or(ErrorCategory::Fatal);
        Self::new(oid, path, format!("{err:#}"), category)
    }

    pub fn is_retryable(&self) -> bool {
        self.category == ErrorCategory::Retryable
    }
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path.as_deref() {
            Some(path) if !path.is_empty() => {
                write!(f, "{} ({}): {}", path, self.oid, self.message)
            }
            _ => write!(f, "{}: {}", self.oid, self.message),
        }
    }
}

impl std::error::Error for TransferError {}

/// Categorize an IO error.
pub fn categorize_io_error(err: &io::Error) -> ErrorCategory {
    match err.kind() {
        io::ErrorKind::TimedOut
        | io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::WouldBlock => ErrorCategory::Retryable,

        // Unknown errors are treated as permanent
        _ => ErrorCategory::Fatal,
    }
}

/// Failure to turn a ready pointer into a transfer descriptor.
#[derive(Debug)]
pub enum ResolveError {
    /// The content found on disk hashes to a different oid than requested.
    PointerMismatch {
        expected: String,
        /// Lookup key that was tried (the working-tree path).
        tried: String,
        actual: String,
        objects_dir: PathBuf,
    },
    /// Neither the object store nor the working tree has the content.
    Missing { oid: String, name: String },
    Io { oid: String, source: io::Error },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::PointerMismatch {
                expected,
                tried,
                actual,
                objects_dir,
            } => write!(
                f,
                "{} does not exist in {}. Tried {}, which matches {}.",
                expected,
                objects_dir.display(),
                tried,
                actual
            ),
            ResolveError::Missing { oid, name } if name.is_empty() => {
                write!(f, "object {oid} not found locally")
            }
            ResolveError::Missing { oid, name } => {
                write!(f, "object {oid} ({name}) not found locally")
            }
            ResolveError::Io { oid, source } => {
                write!(f, "failed to read object {oid}: {source}")
            }
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors that end a push early.
#[derive(Debug)]
pub enum PushError {
    Usage(String),
    /// Resolution found content under a different oid than the pointer named.
    PointerMismatch(ResolveError),
    Fatal(eyre::Report),
}

impl PushError {
    pub fn usage(message: impl Into<String>) -> Self {
        PushError::Usage(message.into())
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            PushError::Usage(_) => USAGE_EXIT_CODE,
            PushError::PointerMismatch(_) => POINTER_MISMATCH_EXIT_CODE,
            PushError::Fatal(_) => FATAL_EXIT_CODE,
        }
    }
}

impl fmt::Display for PushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PushError::Usage(msg) => write!(f, "{msg}"),
            PushError::PointerMismatch(err) => write!(f, "{err}"),
            PushError::Fatal(err) => write!(f, "{err:#}"),
        }
    }
}

impl std::error::Error for PushError {}

impl From<ResolveError> for PushError {
    fn from(err: ResolveError) -> Self {
        match err {
            mismatch @ ResolveError::PointerMismatch { .. } => PushError::PointerMismatch(mismatch),
            other => PushError::Fatal(eyre::Report::new(other)),
        }
    }
}

impl From<eyre::Report> for PushError {
    fn from(err: eyre::Report) -> Self {
        PushError::Fatal(err)
    }
}
