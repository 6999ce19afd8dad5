//! Virtual File Layer Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Low-level failures (`std::io`, zip,
//! tar, decompression, HTTP, S3) are re-signaled as one of these kinds at the
//! node boundary, so callers only ever match on [`ErrorKind`].
//!
//! Kinds carry the display form of the address they concern (never the
//! password).

use derive_more::{Display, Error};
use std::io::{Error as IoError, ErrorKind as IoErrorKind};
use tandem_compress::error::Error as CompressionError;

use crate::FileAddress;

/// A virtual file layer error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for virtual file layer operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The location string couldn't be parsed into an address.
    #[display("malformed address: {_0}")]
    MalformedAddress(#[error(not(source))] String),
    /// No backend is registered for the address' scheme.
    #[display("no backend for scheme: {_0}")]
    UnsupportedScheme(#[error(not(source))] String),
    /// File does not exist on a reachable backend.
    #[display("file not found: {_0}")]
    NotFound(#[error(not(source))] String),
    /// Access denied (permissions or credentials).
    #[display("permission denied: {_0}")]
    PermissionDenied(#[error(not(source))] String),
    /// A mutation was attempted on something that can't be written.
    #[display("read-only: {_0}")]
    ReadOnlyBackend(#[error(not(source))] String),
    /// A folder operation was attempted on something that isn't a folder.
    #[display("not a directory: {_0}")]
    NotADirectory(#[error(not(source))] String),
    /// File already exists (for operations that require new files).
    #[display("file already exists: {_0}")]
    AlreadyExists(#[error(not(source))] String),
    /// The backend (host, bucket, store) can't be reached.
    #[display("unreachable: {_0}")]
    Unreachable(#[error(not(source))] String),
    /// Anything else the backend complained about.
    #[display("backend fault: {_0}")]
    BackendFault(#[error(not(source))] String),
    /// The container is malformed, truncated, or its decoder gave up.
    #[display("corrupt archive: {_0}")]
    CorruptArchive(#[error(not(source))] String),
    /// A second entry stream was opened on an archive that can only serve one.
    #[display("concurrent access unsupported: {_0}")]
    ConcurrentAccessUnsupported(#[error(not(source))] String),
    /// A file can't be added to a file set with a different base.
    #[display("not reachable from base folder: {_0}")]
    OutsideBase(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed, meaning the fault is worth
    /// offering back to whoever decides between retry, skip and cancel.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::PermissionDenied(_)
                | Self::ReadOnlyBackend(_)
                | Self::NotADirectory(_)
                | Self::AlreadyExists(_)
                | Self::Unreachable(_)
                | Self::BackendFault(_)
                | Self::CorruptArchive(_)
        )
    }

    /// Returns `true` if the fault means the whole operation can't continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ConcurrentAccessUnsupported(_))
    }

    /// Map an I/O error to a specific error kind.
    ///
    /// Errors produced by this crate's own stream adapters travel inside the
    /// `io::Error` payload; those are unwrapped as-is.
    pub fn io(err: &IoError, address: &FileAddress) -> Self {
        if let Some(kind) = err.get_ref().and_then(|inner| inner.downcast_ref::<ErrorKind>()) {
            return kind.clone();
        }
        let location = address.to_string();
        match err.kind() {
            IoErrorKind::NotFound => Self::NotFound(location),
            IoErrorKind::PermissionDenied => Self::PermissionDenied(location),
            IoErrorKind::AlreadyExists => Self::AlreadyExists(location),
            IoErrorKind::NotADirectory => Self::NotADirectory(location),
            IoErrorKind::ReadOnlyFilesystem => Self::ReadOnlyBackend(location),
            IoErrorKind::HostUnreachable | IoErrorKind::NetworkUnreachable | IoErrorKind::ConnectionRefused => {
                Self::Unreachable(location)
            },
            _ => Self::BackendFault(format!("{location}: {err}")),
        }
    }

    /// Convert a compression error into a corrupt archive error, preserving
    /// the compress crate's `Exn` frame as a child in the error tree.
    #[track_caller]
    pub fn compression(err: CompressionError, address: &FileAddress) -> Error {
        let detail = format!("{address}: {}", *err);
        err.raise(ErrorKind::CorruptArchive(detail))
    }

    /// Wrap this kind inside an `io::Error`, for blocking readers that can
    /// only report failures through `std::io`.
    pub fn into_io(self) -> IoError {
        let kind = match &self {
            Self::NotFound(_) => IoErrorKind::NotFound,
            Self::PermissionDenied(_) => IoErrorKind::PermissionDenied,
            Self::CorruptArchive(_) => IoErrorKind::InvalidData,
            _ => IoErrorKind::Other,
        };
        IoError::new(kind, self)
    }
}
