//! Questions a job can't answer on its own.
//!
//! A [`DecisionChannel`] is supplied by whoever runs the job: a dialog in a
//! UI, a terminal prompt, or a [`PolicyChannel`] answering from fixed rules.
//! Every question is awaited against the job's cancel signal, so an
//! unanswered prompt never keeps a cancelled job alive.

use async_trait::async_trait;
use derive_more::{Display, Error};
use tandem_vfs::error::ErrorKind as VfsErrorKind;
use tandem_vfs::{FileAddress, Metadata};
use uuid::Uuid;

/// The other end of the channel went away.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
#[display("decision channel closed")]
pub struct ChannelClosed;

/// What to do with a symbolic link that points at a folder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SymlinkDecision {
    /// Walk into the target as if it were a plain folder.
    FollowAsFolder,
    /// Act on the link itself.
    TreatAsFile,
    Skip,
    Cancel,
}

/// What to do after a primitive failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorDecision {
    /// Run the same primitive again.
    Retry,
    /// Abandon this node and carry on.
    Skip,
    Cancel,
}

/// What to do when the destination file already exists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConflictDecision {
    Overwrite,
    /// Overwrite this and every later conflict without asking.
    OverwriteAll,
    /// Overwrite when the destination is older than the source, skip
    /// otherwise, for this and every later conflict.
    OverwriteIfOlder,
    /// Append from the destination's current size.
    Resume,
    Skip,
    /// Skip this and every later conflict without asking.
    SkipAll,
    /// Write to a sibling of the destination with this name instead.
    Rename(String),
    Cancel,
}

/// Which job asked, about what.
#[derive(Clone, Debug)]
pub struct FaultContext {
    pub job_id: Uuid,
    pub path: FileAddress,
    /// 1 on the first failure of this primitive, counting up with each retry.
    pub attempt: u32,
}

/// Both sides of a name clash.
#[derive(Clone, Debug)]
pub struct ConflictContext {
    pub job_id: Uuid,
    pub source: FileAddress,
    pub source_metadata: Metadata,
    pub destination: FileAddress,
    pub destination_metadata: Metadata,
}

/// Answers a job's questions.
///
/// Returning `Err(ChannelClosed)` fails the job; answering `Cancel` from any
/// method interrupts it.
#[async_trait]
pub trait DecisionChannel: Send + Sync {
    /// `path` is a link to the folder at `canonical`.
    async fn resolve_symlink(&self, path: &FileAddress, canonical: &FileAddress) -> Result<SymlinkDecision, ChannelClosed>;

    async fn on_error(&self, context: &FaultContext, fault: &VfsErrorKind) -> Result<ErrorDecision, ChannelClosed>;

    async fn on_conflict(&self, context: &ConflictContext) -> Result<ConflictDecision, ChannelClosed>;
}

/// A channel that never asks anybody.
///
/// Defaults to acting on links themselves, cancelling on the first error and
/// cancelling on the first conflict.
///
/// # Examples
///
/// ```
/// use tandem_jobs::{ErrorDecision, PolicyChannel};
///
/// let channel = PolicyChannel::default().on_error(ErrorDecision::Retry).max_retries(3).auto_rename();
/// ```
#[derive(Clone, Debug)]
pub struct PolicyChannel {
    symlinks: SymlinkDecision,
    errors: ErrorDecision,
    max_retries: u32,
    /// `None` renames to the next free "name (n).ext".
    conflicts: Option<ConflictDecision>,
}
impl PolicyChannel {
    pub fn on_symlink(mut self, decision: SymlinkDecision) -> Self {
        self.symlinks = decision;
        self
    }

    /// Answer every fault with `decision`. A `Retry` policy gives up and
    /// skips once [`max_retries()`](Self::max_retries) is used up.
    pub fn on_error(mut self, decision: ErrorDecision) -> Self {
        self.errors = decision;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn on_conflict(mut self, decision: ConflictDecision) -> Self {
        self.conflicts = Some(decision);
        self
    }

    /// Answer conflicts by renaming "report.txt" to "report (1).txt",
    /// "report (1).txt" to "report (2).txt", and so on.
    pub fn auto_rename(mut self) -> Self {
        self.conflicts = None;
        self
    }
}
impl Default for PolicyChannel {
    fn default() -> Self {
        Self {
            symlinks: SymlinkDecision::TreatAsFile,
            errors: ErrorDecision::Cancel,
            max_retries: 3,
            conflicts: Some(ConflictDecision::Cancel),
        }
    }
}

#[async_trait]
impl DecisionChannel for PolicyChannel {
    async fn resolve_symlink(&self, _path: &FileAddress, _canonical: &FileAddress) -> Result<SymlinkDecision, ChannelClosed> {
        Ok(self.symlinks)
    }

    async fn on_error(&self, context: &FaultContext, _fault: &VfsErrorKind) -> Result<ErrorDecision, ChannelClosed> {
        Ok(match self.errors {
            ErrorDecision::Retry if context.attempt > self.max_retries => ErrorDecision::Skip,
            decision => decision,
        })
    }

    async fn on_conflict(&self, context: &ConflictContext) -> Result<ConflictDecision, ChannelClosed> {
        Ok(match &self.conflicts {
            Some(decision) => decision.clone(),
            None => ConflictDecision::Rename(next_free_name(context.destination.name().unwrap_or_default())),
        })
    }
}

/// "report.txt" → "report (1).txt"; "report (1).txt" → "report (2).txt".
pub fn next_free_name(name: &str) -> String {
    let (stem, extension) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    let counted = stem
        .strip_suffix(')')
        .and_then(|rest| rest.rsplit_once(" ("))
        .and_then(|(base, n)| n.parse::<u32>().ok().map(|n| (base, n)));
    match counted {
        Some((base, n)) => format!("{base} ({}){extension}", n + 1),
        None => format!("{stem} (1){extension}"),
    }
}
