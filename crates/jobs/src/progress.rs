//! What a job tells the outside world.
//!
//! Two views of the same counters: a [`Progress`] snapshot that can be
//! polled at any time, and a stream of [`JobEvent`]s for consumers that want
//! every transition. The event stream is unbounded so a slow consumer never
//! stalls the job.

use derive_more::Display;
use tandem_vfs::FileAddress;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// Lifecycle of a job.
///
/// `Created → Running ⇄ Paused → {Completed, Interrupted, Failed}`.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum JobState {
    #[display("created")]
    Created,
    #[display("running")]
    Running,
    #[display("paused")]
    Paused,
    #[display("completed")]
    Completed,
    #[display("interrupted")]
    Interrupted,
    #[display("failed")]
    Failed,
}
impl JobState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Interrupted | Self::Failed)
    }
}

/// Counters at one point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Progress {
    pub job_id: Uuid,
    pub state: JobState,
    /// The node being worked on, if any.
    pub current_path: Option<FileAddress>,
    pub bytes_done: u64,
    /// Only known when the job was asked to compute totals up front.
    pub bytes_total: Option<u64>,
    pub files_done: u64,
    pub files_total: Option<u64>,
    pub files_skipped: u64,
    pub files_errored: u64,
}
impl Progress {
    fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            state: JobState::Created,
            current_path: None,
            bytes_done: 0,
            bytes_total: None,
            files_done: 0,
            files_total: None,
            files_skipped: 0,
            files_errored: 0,
        }
    }
}

/// A per-file failure that was not retried away.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobFault {
    pub path: FileAddress,
    pub cause: String,
}

/// Final account of a job, available once it reaches a terminal state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: Uuid,
    pub state: JobState,
    pub bytes_done: u64,
    pub files_done: u64,
    pub files_skipped: u64,
    pub files_errored: u64,
    /// Every fault answered with skip, in the order they happened.
    pub faults: Vec<JobFault>,
    /// Why the job failed, when it did.
    pub failure: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventKind {
    StateChanged(JobState),
    /// Work on a node is about to begin. Sent for folders too, before their
    /// children.
    FileStarted(FileAddress),
    /// Bytes were copied.
    Progress,
    Skipped(FileAddress),
    Faulted(JobFault),
    /// Always the last event of a job.
    Finished(JobReport),
}

/// One event plus the counters as they stood when it was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobEvent {
    pub progress: Progress,
    pub kind: EventKind,
}

/// The job side of progress reporting.
pub(crate) struct Reporter {
    progress: watch::Sender<Progress>,
    events: mpsc::UnboundedSender<JobEvent>,
    faults: Vec<JobFault>,
}
impl Reporter {
    pub(crate) fn new(job_id: Uuid) -> (Self, watch::Receiver<Progress>, mpsc::UnboundedReceiver<JobEvent>) {
        let (progress, watcher) = watch::channel(Progress::new(job_id));
        let (events, receiver) = mpsc::unbounded_channel();
        let reporter = Self {
            progress,
            events,
            faults: Vec::new(),
        };
        (reporter, watcher, receiver)
    }

    fn update(&self, kind: EventKind, change: impl FnOnce(&mut Progress)) {
        self.progress.send_modify(change);
        let progress = self.progress.borrow().clone();
        // Nobody listening is fine.
        let _ = self.events.send(JobEvent { progress, kind });
    }

    pub(crate) fn snapshot(&self) -> Progress {
        self.progress.borrow().clone()
    }

    pub(crate) fn set_state(&self, state: JobState) {
        if self.progress.borrow().state != state {
            self.update(EventKind::StateChanged(state), |p| p.state = state);
        }
    }

    pub(crate) fn set_totals(&self, bytes: u64, files: u64) {
        self.progress.send_modify(|p| {
            p.bytes_total = Some(bytes);
            p.files_total = Some(files);
        });
    }

    pub(crate) fn started(&self, path: &FileAddress) {
        self.update(EventKind::FileStarted(path.clone()), |p| p.current_path = Some(path.clone()));
    }

    pub(crate) fn add_bytes(&self, bytes: u64) {
        if bytes > 0 {
            self.update(EventKind::Progress, |p| p.bytes_done += bytes);
        }
    }

    /// Take back bytes from an attempt that didn't stick.
    pub(crate) fn rollback_bytes(&self, bytes: u64) {
        self.progress.send_modify(|p| p.bytes_done = p.bytes_done.saturating_sub(bytes));
    }

    pub(crate) fn file_done(&self) {
        self.progress.send_modify(|p| p.files_done += 1);
    }

    pub(crate) fn skipped(&self, path: &FileAddress) {
        self.update(EventKind::Skipped(path.clone()), |p| p.files_skipped += 1);
    }

    pub(crate) fn faulted(&mut self, path: &FileAddress, cause: String) {
        let fault = JobFault {
            path: path.clone(),
            cause,
        };
        self.faults.push(fault.clone());
        self.update(EventKind::Faulted(fault), |p| p.files_errored += 1);
    }

    /// Build the report, then publish the terminal state. The report is
    /// handed back before the state flips so waiters always find it.
    pub(crate) fn finish(&mut self, state: JobState, failure: Option<String>, publish: impl FnOnce(JobReport)) {
        let progress = self.snapshot();
        let report = JobReport {
            job_id: progress.job_id,
            state,
            bytes_done: progress.bytes_done,
            files_done: progress.files_done,
            files_skipped: progress.files_skipped,
            files_errored: progress.files_errored,
            faults: std::mem::take(&mut self.faults),
            failure,
        };
        publish(report.clone());
        self.set_state(state);
        self.update(EventKind::Finished(report), |p| p.current_path = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_follow_counters() {
        let (mut reporter, watcher, mut events) = Reporter::new(Uuid::nil());
        let path = FileAddress::parse("/tmp/a.txt").unwrap();
        reporter.set_state(JobState::Running);
        reporter.started(&path);
        reporter.add_bytes(10);
        reporter.add_bytes(0);
        reporter.faulted(&path, "boom".to_string());
        reporter.skipped(&path);

        let mut published = None;
        reporter.finish(JobState::Completed, None, |report| published = Some(report));
        let report = published.unwrap();
        assert_eq!(report.bytes_done, 10);
        assert_eq!(report.files_errored, 1);
        assert_eq!(report.faults, [JobFault { path: path.clone(), cause: "boom".to_string() }]);
        assert_eq!(watcher.borrow().state, JobState::Completed);

        let mut kinds = Vec::new();
        while let Ok(event) = events.try_recv() {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.len(), 7);
        assert_eq!(kinds[0], EventKind::StateChanged(JobState::Running));
        assert_eq!(kinds[2], EventKind::Progress);
        assert_eq!(kinds[5], EventKind::StateChanged(JobState::Completed));
        assert!(matches!(kinds[6], EventKind::Finished(_)));
    }

    #[test]
    fn test_repeated_state_is_not_announced() {
        let (reporter, _watcher, mut events) = Reporter::new(Uuid::nil());
        reporter.set_state(JobState::Running);
        reporter.set_state(JobState::Running);
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());
    }
}
