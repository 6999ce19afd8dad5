#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tandem_jobs::{
    ChannelClosed, ConflictContext, ConflictDecision, DecisionChannel, ErrorDecision, FaultContext, Job, JobContext,
    JobEvent, JobHandle, JobKind, JobReport, PolicyChannel, SymlinkDecision,
};
use tandem_vfs::backend::MemoryBackend;
use tandem_vfs::error::ErrorKind;
use tandem_vfs::{FileAddress, FileSet, Registry};
use tokio::sync::{Notify, mpsc};
use zip::write::FileOptions;

pub fn registry(stores: &[&MemoryBackend]) -> Arc<Registry> {
    let mut registry = Registry::empty();
    for store in stores {
        registry.register(Arc::new((*store).clone()));
    }
    Arc::new(registry)
}

pub fn context(stores: &[&MemoryBackend], channel: impl DecisionChannel + 'static) -> JobContext {
    JobContext::new(registry(stores), Arc::new(channel))
}

/// Members given relative to the store root, which is also the base.
pub fn selection(store: &MemoryBackend, paths: &[&str]) -> FileSet {
    FileSet::from_nodes(store.node(""), paths.iter().map(|path| store.node(path))).unwrap()
}

pub async fn run(kind: JobKind, files: FileSet, context: JobContext) -> JobReport {
    let job = Job::new(kind, files, context);
    job.start().unwrap();
    job.await_terminal_state().await
}

pub fn text(store: &MemoryBackend, path: &str) -> Option<String> {
    store.read(path).map(|data| String::from_utf8(data).unwrap())
}

/// Drain events until one matches, failing if the stream ends first.
pub async fn wait_for_event(events: &mut mpsc::UnboundedReceiver<JobEvent>, wanted: impl Fn(&JobEvent) -> bool) {
    while let Some(event) = events.recv().await {
        if wanted(&event) {
            return;
        }
    }
    panic!("event stream ended before the expected event");
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in files {
        writer
            .start_file(*name, FileOptions::default().compression_method(zip::CompressionMethod::Deflated))
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn tar_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Answers conflicts from a script and counts every question.
#[derive(Default)]
pub struct Scripted {
    pub conflicts: Mutex<VecDeque<ConflictDecision>>,
    pub conflicts_asked: AtomicUsize,
    pub errors_asked: AtomicUsize,
}
impl Scripted {
    pub fn new(conflicts: impl IntoIterator<Item = ConflictDecision>) -> Self {
        Self {
            conflicts: Mutex::new(conflicts.into_iter().collect()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl DecisionChannel for Scripted {
    async fn resolve_symlink(&self, _path: &FileAddress, _canonical: &FileAddress) -> Result<SymlinkDecision, ChannelClosed> {
        Ok(SymlinkDecision::Skip)
    }

    async fn on_error(&self, _context: &FaultContext, _fault: &ErrorKind) -> Result<ErrorDecision, ChannelClosed> {
        self.errors_asked.fetch_add(1, Ordering::SeqCst);
        Ok(ErrorDecision::Skip)
    }

    async fn on_conflict(&self, _context: &ConflictContext) -> Result<ConflictDecision, ChannelClosed> {
        self.conflicts_asked.fetch_add(1, Ordering::SeqCst);
        self.conflicts.lock().unwrap().pop_front().ok_or(ChannelClosed)
    }
}

/// Holds every conflict question until the test lets it through.
pub struct Gated {
    pub asked: Notify,
    pub release: Notify,
    pub answer: ConflictDecision,
}
impl Gated {
    pub fn new(answer: ConflictDecision) -> Arc<Self> {
        Arc::new(Self {
            asked: Notify::new(),
            release: Notify::new(),
            answer,
        })
    }
}

#[async_trait]
impl DecisionChannel for Gated {
    async fn resolve_symlink(&self, _path: &FileAddress, _canonical: &FileAddress) -> Result<SymlinkDecision, ChannelClosed> {
        Ok(SymlinkDecision::Skip)
    }

    async fn on_error(&self, _context: &FaultContext, _fault: &ErrorKind) -> Result<ErrorDecision, ChannelClosed> {
        Ok(ErrorDecision::Skip)
    }

    async fn on_conflict(&self, _context: &ConflictContext) -> Result<ConflictDecision, ChannelClosed> {
        self.asked.notify_one();
        self.release.notified().await;
        Ok(self.answer.clone())
    }
}

/// A channel whose other end is gone.
pub struct Closed;

#[async_trait]
impl DecisionChannel for Closed {
    async fn resolve_symlink(&self, _path: &FileAddress, _canonical: &FileAddress) -> Result<SymlinkDecision, ChannelClosed> {
        Err(ChannelClosed)
    }

    async fn on_error(&self, _context: &FaultContext, _fault: &ErrorKind) -> Result<ErrorDecision, ChannelClosed> {
        Err(ChannelClosed)
    }

    async fn on_conflict(&self, _context: &ConflictContext) -> Result<ConflictDecision, ChannelClosed> {
        Err(ChannelClosed)
    }
}

pub fn skip_errors() -> PolicyChannel {
    PolicyChannel::default().on_error(ErrorDecision::Skip)
}

pub fn start(kind: JobKind, files: FileSet, context: JobContext) -> JobHandle {
    let job = Job::new(kind, files, context);
    job.start().unwrap();
    job
}
