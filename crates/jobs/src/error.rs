//! Job Error Types
//!
//! Per-file faults never show up here: they go to the decision channel and
//! end up in the job's report. These kinds cover what stops a job outright,
//! plus misuse of a [`JobHandle`](crate::JobHandle).

use derive_more::{Display, Error};

/// A job error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for job operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Nobody is left to answer a question the job had to ask.
    #[display("decision channel closed while asking about {_0}")]
    Channel(#[error(not(source))] String),
    /// A fault that makes every remaining file pointless to try.
    #[display("fatal fault: {_0}")]
    Fatal(#[error(not(source))] String),
    /// The scheduler stopped handing out worker slots.
    #[display("scheduler closed")]
    Scheduler,
    /// A virtual file layer call failed outside any single file, such as
    /// opening an archive to unpack.
    #[display("file layer error: {_0}")]
    Vfs(#[error(not(source))] String),
    /// [`start()`](crate::JobHandle::start) was called on a job that is
    /// already running or done.
    #[display("job {_0} was already started")]
    AlreadyStarted(#[error(not(source))] String),
    /// The job's task died without reporting.
    #[display("job worker failed: {_0}")]
    Worker(#[error(not(source))] String),
}

impl ErrorKind {
    /// Build the kind for a virtual file layer error that ends the job.
    pub(crate) fn from_vfs(err: &tandem_vfs::error::Error) -> Self {
        let kind: &tandem_vfs::error::ErrorKind = err;
        if kind.is_fatal() { Self::Fatal(kind.to_string()) } else { Self::Vfs(kind.to_string()) }
    }
}
