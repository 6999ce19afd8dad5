//! File operation jobs.
//!
//! A [`Job`] deletes, copies, moves or unpacks a [`FileSet`](tandem_vfs::FileSet)
//! on its own task. The caller keeps a [`JobHandle`] to pause, resume or
//! cancel it, watch its [`Progress`], and read its [`JobReport`] at the end.
//! Whenever the job can't proceed safely on its own (a failed primitive, a
//! file already in the way, a link to a folder) it asks the
//! [`DecisionChannel`] it was given.
//!
//! How many jobs do work at once is bounded by a shared [`Scheduler`].

mod control;
pub mod decision;
mod engine;
pub mod error;
mod job;
mod progress;
mod scheduler;

pub use crate::decision::{
    ChannelClosed, ConflictContext, ConflictDecision, DecisionChannel, ErrorDecision, FaultContext, PolicyChannel,
    SymlinkDecision,
};
pub use crate::job::{Job, JobContext, JobHandle, JobKind, JobOptions};
pub use crate::progress::{EventKind, JobEvent, JobFault, JobReport, JobState, Progress};
pub use crate::scheduler::Scheduler;
