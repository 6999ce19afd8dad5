//! The walk behind every job.
//!
//! A job runs on one task and visits its files one at a time. Every
//! primitive (metadata, listing, delete, mkdir, rename, copy) goes through
//! [`Engine::retry()`], which hands failures to the decision channel and
//! records the ones that end up skipped. Anything that should stop the whole
//! job travels up as a [`Halt`].

mod copy;
mod delete;
mod stream;

use crate::control::{Control, Signal, cancelled};
use crate::decision::{ChannelClosed, ErrorDecision, FaultContext};
use crate::error::{Error, ErrorKind};
use crate::job::{ChangeLog, JobContext, JobKind};
use crate::progress::{JobReport, JobState, Reporter};
use exn::ResultExt;
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tandem_vfs::error::{Error as VfsError, ErrorKind as VfsErrorKind, Result as VfsResult};
use tandem_vfs::{ArchiveNode, FileAddress, FileNode, FileSet, NodeHandle, NodeKind};
use tokio::sync::watch;
use uuid::Uuid;

use self::copy::Mode;

/// Why a job stopped early.
pub(crate) enum Halt {
    Interrupted,
    Failed(Error),
}

pub(crate) type Step<T> = std::result::Result<T, Halt>;

/// How a visit to one node ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Done,
    /// The node, or something below it, was left alone.
    Skipped,
}

enum Recovery {
    Retry,
    Skip,
}

/// A conflict answer that applies to the rest of the job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Standing {
    OverwriteAll,
    OverwriteIfOlder,
    SkipAll,
}

pub(crate) struct Engine {
    id: Uuid,
    kind: JobKind,
    files: FileSet,
    context: JobContext,
    control: Control,
    signals: watch::Receiver<Signal>,
    reporter: Reporter,
    report: Arc<OnceLock<JobReport>>,
    changes: Arc<ChangeLog>,
    /// Canonical addresses of folders already walked.
    visited: HashSet<FileAddress>,
    standing: Option<Standing>,
}
impl Engine {
    #[expect(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: Uuid,
        kind: JobKind,
        files: FileSet,
        context: JobContext,
        control: Control,
        reporter: Reporter,
        report: Arc<OnceLock<JobReport>>,
        changes: Arc<ChangeLog>,
    ) -> Self {
        Self {
            id,
            kind,
            files,
            context,
            signals: control.subscribe(),
            control,
            reporter,
            report,
            changes,
            visited: HashSet::new(),
            standing: None,
        }
    }

    pub(crate) async fn run(mut self) {
        let (state, failure) = match self.run_with_slot().await {
            Ok(()) => (JobState::Completed, None),
            Err(Halt::Interrupted) => (JobState::Interrupted, None),
            Err(Halt::Failed(err)) => {
                let cause = (*err).to_string();
                tracing::error!(%cause, "Job failed");
                (JobState::Failed, Some(cause))
            },
        };
        let cell = Arc::clone(&self.report);
        self.reporter.finish(state, failure, |report| {
            let _ = cell.set(report);
        });
        let progress = self.reporter.snapshot();
        tracing::info!(
            %state,
            bytes = progress.bytes_done,
            files = progress.files_done,
            skipped = progress.files_skipped,
            errored = progress.files_errored,
            "Job finished"
        );
    }

    async fn run_with_slot(&mut self) -> Step<()> {
        let scheduler = self.context.scheduler.clone();
        let _slot = tokio::select! {
            biased;
            () = cancelled(self.control.subscribe()) => return Err(Halt::Interrupted),
            slot = scheduler.acquire() => slot.map_err(Halt::Failed)?,
        };
        self.reporter.set_state(JobState::Running);
        tracing::info!(files = self.files.len(), "Job running");
        if self.context.options.compute_totals {
            self.compute_totals().await;
        }
        self.execute().await
    }

    async fn execute(&mut self) -> Step<()> {
        let members: Vec<NodeHandle> = self.files.iter().cloned().collect();
        let kind = self.kind.clone();
        for member in members {
            self.checkpoint().await?;
            match &kind {
                JobKind::Delete => {
                    self.delete_node(member).await?;
                },
                JobKind::Copy { destination } => {
                    let name = member.name();
                    self.copy_node(member, Arc::clone(destination), name, Mode::Copy).await?;
                },
                JobKind::Move { destination } => {
                    let name = member.name();
                    self.copy_node(member, Arc::clone(destination), name, Mode::Move).await?;
                },
                JobKind::Unpack { destination } => {
                    self.unpack(member, destination).await?;
                },
            }
        }
        Ok(())
    }

    /// Honour pause and cancel requests.
    async fn checkpoint(&mut self) -> Step<()> {
        let mut paused = false;
        loop {
            let signal = *self.signals.borrow_and_update();
            match signal {
                Signal::Run => break,
                Signal::Cancel => return Err(Halt::Interrupted),
                Signal::Pause => {
                    if !paused {
                        paused = true;
                        self.reporter.set_state(JobState::Paused);
                        tracing::info!("Job paused");
                    }
                    if self.signals.changed().await.is_err() {
                        return Err(Halt::Interrupted);
                    }
                },
            }
        }
        if paused {
            self.reporter.set_state(JobState::Running);
            tracing::info!("Job resumed");
        }
        Ok(())
    }

    /// Wait for an answer from the decision channel, unless the job is
    /// cancelled first.
    async fn decide<T>(&self, about: &FileAddress, question: impl Future<Output = Result<T, ChannelClosed>>) -> Step<T> {
        tokio::select! {
            biased;
            () = cancelled(self.control.subscribe()) => Err(Halt::Interrupted),
            answer = question => answer.or_raise(|| ErrorKind::Channel(about.to_string())).map_err(Halt::Failed),
        }
    }

    /// Ask what to do about a failed primitive.
    async fn resolve_fault(&mut self, path: &FileAddress, err: VfsError, attempt: u32) -> Step<Recovery> {
        let kind: &VfsErrorKind = &err;
        tracing::warn!(%path, cause = %kind, attempt, "Operation failed");
        if kind.is_fatal() {
            let fatal = ErrorKind::from_vfs(&err);
            return Err(Halt::Failed(err.raise(fatal)));
        }
        let decision = if kind.is_retryable() {
            let context = FaultContext {
                job_id: self.id,
                path: path.clone(),
                attempt,
            };
            self.decide(path, self.context.channel.on_error(&context, kind)).await?
        } else {
            ErrorDecision::Skip
        };
        match decision {
            ErrorDecision::Retry => {
                tracing::debug!(%path, attempt, "Retrying");
                Ok(Recovery::Retry)
            },
            ErrorDecision::Skip => {
                let cause = kind.to_string();
                self.reporter.faulted(path, cause);
                self.reporter.skipped(path);
                Ok(Recovery::Skip)
            },
            ErrorDecision::Cancel => Err(Halt::Interrupted),
        }
    }

    /// Run `primitive` until it succeeds, is skipped, or the job stops.
    /// `None` means it was skipped and the fault has been recorded.
    async fn retry<T, F, Fut>(&mut self, path: &FileAddress, mut primitive: F) -> Step<Option<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = VfsResult<T>>,
    {
        let mut attempt = 0;
        loop {
            self.checkpoint().await?;
            match primitive().await {
                Ok(value) => return Ok(Some(value)),
                Err(err) => {
                    attempt += 1;
                    if let Recovery::Skip = self.resolve_fault(path, err, attempt).await? {
                        return Ok(None);
                    }
                },
            }
        }
    }

    /// Mark a folder as walked. `false` if it already was, which means a
    /// link loops back on itself.
    fn enter_folder(&mut self, node: &dyn FileNode, canonical: FileAddress) -> bool {
        if self.visited.insert(canonical) {
            return true;
        }
        let path = node.address();
        tracing::warn!(%path, "Folder already visited; skipping link cycle");
        self.reporter.skipped(path);
        false
    }

    /// Canonical address of a folder, falling back to its own address when
    /// the backend can't say.
    async fn canonical(node: &dyn FileNode) -> FileAddress {
        node.canonical().await.unwrap_or_else(|_| node.address().clone())
    }

    /// Size up the work ahead. Any failure just leaves the totals unknown.
    async fn compute_totals(&mut self) {
        let mut bytes = 0;
        let mut files = 0;
        for member in self.files.iter() {
            let scanned = match &self.kind {
                JobKind::Unpack { .. } => {
                    scan_archive(member, self.context.registry.sniffs_archives(), &mut bytes, &mut files).await
                },
                _ => scan(member, &mut bytes, &mut files).await,
            };
            if let Err(err) = scanned {
                let cause: &VfsErrorKind = &err;
                tracing::debug!(path = %member.address(), %cause, "Unable to compute totals");
                return;
            }
        }
        tracing::debug!(bytes, files, "Computed totals");
        self.reporter.set_totals(bytes, files);
    }
}

fn scan<'a>(node: &'a NodeHandle, bytes: &'a mut u64, files: &'a mut u64) -> BoxFuture<'a, VfsResult<()>> {
    Box::pin(async move {
        let metadata = node.metadata().await?;
        match metadata.kind {
            NodeKind::Directory => {
                for child in node.list().await? {
                    scan(&child, bytes, files).await?;
                }
            },
            // Links are only followed when the channel says so; count them
            // as one file.
            NodeKind::Symlink { .. } => *files += 1,
            NodeKind::Regular => {
                *bytes += metadata.size.unwrap_or(0);
                *files += 1;
            },
        }
        Ok(())
    })
}

async fn scan_archive(member: &NodeHandle, sniff: bool, bytes: &mut u64, files: &mut u64) -> VfsResult<()> {
    let archive = ArchiveNode::open_with(Arc::clone(member), sniff).await?;
    for entry in archive.entries().await?.iter().filter(|entry| !entry.is_dir()) {
        *bytes += entry.size().unwrap_or(0);
        *files += 1;
    }
    Ok(())
}
