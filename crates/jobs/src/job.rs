use crate::control::Control;
use crate::decision::DecisionChannel;
use crate::engine::Engine;
use crate::error::{ErrorKind, Result};
use crate::progress::{JobEvent, JobReport, JobState, Progress, Reporter};
use crate::scheduler::Scheduler;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tandem_vfs::{FileAddress, FileSet, NodeHandle, Registry};
use tokio::sync::{mpsc, watch};
use tracing::Instrument;
use uuid::Uuid;

/// What a job does to its files.
#[derive(Clone, Debug)]
pub enum JobKind {
    /// Remove every member, folders depth-first.
    Delete,
    /// Copy every member into the `destination` folder, merging folders that
    /// already exist there.
    Copy { destination: NodeHandle },
    /// Like `Copy`, removing each source once it has been copied. Renames
    /// instead where the backend can.
    Move { destination: NodeHandle },
    /// Open every member as an archive and copy its contents into the
    /// `destination` folder.
    Unpack { destination: NodeHandle },
}
impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Copy { .. } => "copy",
            Self::Move { .. } => "move",
            Self::Unpack { .. } => "unpack",
        }
    }

    pub fn destination(&self) -> Option<&NodeHandle> {
        match self {
            Self::Delete => None,
            Self::Copy { destination } | Self::Move { destination } | Self::Unpack { destination } => Some(destination),
        }
    }
}

/// Tuning knobs for a single job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobOptions {
    /// Chunk size for streamed copies; pause and cancel are checked between
    /// chunks.
    pub buffer_size: usize,
    /// Walk every member before starting, so progress has totals.
    pub compute_totals: bool,
}
impl Default for JobOptions {
    fn default() -> Self {
        Self {
            buffer_size: 64 * 1024,
            compute_totals: false,
        }
    }
}

/// Everything a job borrows from the application.
#[derive(Clone)]
pub struct JobContext {
    /// Resolves symlink targets when a link is followed.
    pub registry: Arc<Registry>,
    pub channel: Arc<dyn DecisionChannel>,
    pub scheduler: Scheduler,
    pub options: JobOptions,
}
impl JobContext {
    pub fn new(registry: Arc<Registry>, channel: Arc<dyn DecisionChannel>) -> Self {
        Self {
            registry,
            channel,
            scheduler: Scheduler::default(),
            options: JobOptions::default(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }
}

/// Folders a job created, emptied or renamed things in.
#[derive(Debug, Default)]
pub(crate) struct ChangeLog {
    folders: Mutex<HashSet<FileAddress>>,
}
impl ChangeLog {
    /// Note that the folder holding `address` changed.
    pub(crate) fn touch(&self, address: &FileAddress) {
        if let Some(parent) = address.parent() {
            self.touch_folder(parent);
        }
    }

    pub(crate) fn touch_folder(&self, folder: FileAddress) {
        self.folders.lock().unwrap_or_else(PoisonError::into_inner).insert(folder);
    }

    fn overlaps(&self, folder: &FileAddress) -> bool {
        self.folders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|touched| touched == folder || touched.is_ancestor_of(folder) || folder.is_ancestor_of(touched))
    }
}

/// Builds jobs.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tandem_jobs::{Job, JobContext, JobKind, JobState, PolicyChannel};
/// use tandem_vfs::backend::MemoryBackend;
/// use tandem_vfs::{FileSet, Registry};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryBackend::with_files("scratch", [("old/a.txt", "a"), ("old/b.txt", "b")]);
/// let files = FileSet::from_nodes(store.node(""), [store.node("old")]).unwrap();
/// let context = JobContext::new(Arc::new(Registry::empty()), Arc::new(PolicyChannel::default()));
///
/// let job = Job::new(JobKind::Delete, files, context);
/// job.start().unwrap();
/// let report = job.await_terminal_state().await;
/// assert_eq!(report.state, JobState::Completed);
/// assert_eq!(report.files_done, 2);
/// assert!(!store.contains("old"));
/// # }
/// ```
pub struct Job;
impl Job {
    /// Set up a job without starting it.
    pub fn new(kind: JobKind, files: FileSet, context: JobContext) -> JobHandle {
        let id = Uuid::new_v4();
        let (reporter, progress, events) = Reporter::new(id);
        let control = Control::new();
        let report = Arc::new(OnceLock::new());
        let changes = Arc::new(ChangeLog::default());
        let base = files.base().address().clone();
        let destination = kind.destination().map(|node| node.address().clone());
        let name = kind.name();
        let engine = Engine::new(
            id,
            kind,
            files,
            context,
            control.clone(),
            reporter,
            Arc::clone(&report),
            Arc::clone(&changes),
        );
        JobHandle {
            shared: Arc::new(Shared {
                id,
                kind: name,
                control,
                progress,
                report,
                changes,
                base,
                destination,
                pending: Mutex::new(Some(engine)),
                events: Mutex::new(Some(events)),
            }),
        }
    }
}

struct Shared {
    id: Uuid,
    kind: &'static str,
    control: Control,
    progress: watch::Receiver<Progress>,
    report: Arc<OnceLock<JobReport>>,
    changes: Arc<ChangeLog>,
    base: FileAddress,
    destination: Option<FileAddress>,
    pending: Mutex<Option<Engine>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<JobEvent>>>,
}

/// Control and observe one job. Cloning gives another handle on the same
/// job.
#[derive(Clone)]
pub struct JobHandle {
    shared: Arc<Shared>,
}
impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn kind(&self) -> &'static str {
        self.shared.kind
    }

    /// Queue the job on its scheduler. It enters `Running` once a slot is
    /// free. Must be called from within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        let Some(engine) = self.shared.pending.lock().unwrap_or_else(PoisonError::into_inner).take() else {
            exn::bail!(ErrorKind::AlreadyStarted(self.shared.id.to_string()));
        };
        let span = tracing::info_span!("job", job_id = %self.shared.id, kind = self.shared.kind);
        tokio::spawn(engine.run().instrument(span));
        Ok(())
    }

    /// Takes effect at the job's next checkpoint: between files, between
    /// I/O calls, or between copy chunks.
    pub fn pause(&self) {
        self.shared.control.pause();
    }

    pub fn resume(&self) {
        self.shared.control.resume();
    }

    /// Also wakes a job that's waiting on a decision, a pause or a slot.
    pub fn cancel(&self) {
        self.shared.control.cancel();
    }

    pub fn state(&self) -> JobState {
        self.shared.progress.borrow().state
    }

    pub fn snapshot(&self) -> Progress {
        self.shared.progress.borrow().clone()
    }

    /// The job's event stream. Only the first call gets it.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<JobEvent>> {
        self.shared.events.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Whether a view of `folder` should be refreshed after this job.
    pub fn has_changed(&self, folder: &FileAddress) -> bool {
        folder == &self.shared.base
            || self.shared.destination.as_ref() == Some(folder)
            || self.shared.changes.overlaps(folder)
    }

    /// Wait for the job to finish and return its report. Never returns for
    /// a job that was never started.
    pub async fn await_terminal_state(&self) -> JobReport {
        let mut progress = self.shared.progress.clone();
        let finished = progress.wait_for(|p| p.state.is_terminal()).await.is_ok();
        if let Some(report) = self.shared.report.get() {
            return report.clone();
        }
        // The worker went away without reporting.
        let last = self.snapshot();
        tracing::error!(job_id = %self.shared.id, finished, "Job ended without a report");
        JobReport {
            job_id: self.shared.id,
            state: JobState::Failed,
            bytes_done: last.bytes_done,
            files_done: last.files_done,
            files_skipped: last.files_skipped,
            files_errored: last.files_errored,
            faults: Vec::new(),
            failure: Some(ErrorKind::Worker("job task stopped without reporting".to_string()).to_string()),
        }
    }
}
impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("state", &self.state())
            .finish()
    }
}
