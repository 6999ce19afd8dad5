//! In-memory backend for testing.
//!
//! Besides holding a tree of files, folders and links, the store records a
//! journal of every call made against it and can be told to fail specific
//! calls, so tests can assert on ordering and exercise error paths without
//! touching a disk.

use crate::error::{ErrorKind, Result};
use crate::node::validate_name;
use crate::{
    Backend, BoxSyncRead, BoxSyncWrite, CopyHint, FileAddress, FileNode, Metadata, NodeHandle, NodeKind, NodeStream,
    Permissions, Scheme,
};
use async_stream::stream;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use time::OffsetDateTime;
use tokio::sync::Notify;

const MAX_LINK_HOPS: usize = 16;

/// Operations recorded in a [`MemoryBackend`]'s journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Metadata,
    List,
    OpenRead,
    OpenWrite,
    Delete,
    Mkdir,
    Rename,
    NativeCopy,
}

/// One journal line: what was asked of which path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub path: String,
}

#[derive(Clone, Debug)]
enum Entry {
    File { data: Vec<u8>, modified: OffsetDateTime },
    Dir { modified: OffsetDateTime },
    Symlink { target: Vec<String> },
}

struct Fault {
    op: Op,
    path: String,
    kind: ErrorKind,
    remaining: Option<usize>,
}

struct Store {
    name: String,
    root: FileAddress,
    tree: RwLock<BTreeMap<Vec<String>, Entry>>,
    journal: Mutex<Vec<Call>>,
    faults: Mutex<Vec<Fault>>,
    gates: Mutex<Vec<(String, usize, ReadGate)>>,
    native_copy: AtomicBool,
    native_move: AtomicBool,
}

fn key(path: &str) -> Vec<String> {
    path.split('/').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn display(key: &[String]) -> String {
    format!("/{}", key.join("/"))
}

impl Store {
    fn tree(&self) -> RwLockReadGuard<'_, BTreeMap<Vec<String>, Entry>> {
        self.tree.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn tree_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<Vec<String>, Entry>> {
        self.tree.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, Vec<Fault>> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal the call, then fail it if a fault is armed for it.
    fn enter(&self, op: Op, key: &[String]) -> Result<()> {
        let path = display(key);
        self.journal.lock().unwrap_or_else(PoisonError::into_inner).push(Call { op, path: path.clone() });
        let mut faults = self.faults();
        let Some(idx) = faults.iter().position(|f| f.op == op && f.path == path) else {
            return Ok(());
        };
        let kind = faults[idx].kind.clone();
        if let Some(remaining) = &mut faults[idx].remaining {
            *remaining -= 1;
            if *remaining == 0 {
                faults.remove(idx);
            }
        }
        exn::bail!(kind)
    }

    /// Follow links in every component of `key`; the last one too if
    /// `follow_last`.
    fn resolve(tree: &BTreeMap<Vec<String>, Entry>, key: &[String], follow_last: bool) -> Vec<String> {
        let mut resolved: Vec<String> = Vec::new();
        let mut hops = 0;
        let mut pending: Vec<String> = key.iter().rev().cloned().collect();
        while let Some(segment) = pending.pop() {
            resolved.push(segment);
            let is_last = pending.is_empty();
            if is_last && !follow_last {
                break;
            }
            while let Some(Entry::Symlink { target }) = tree.get(&resolved) {
                hops += 1;
                if hops > MAX_LINK_HOPS {
                    return resolved;
                }
                resolved = target.clone();
            }
        }
        resolved
    }

    fn address_of(&self, key: &[String]) -> FileAddress {
        self.root.join(&key.join("/"))
    }

    fn append(&self, key: &[String], bytes: &[u8]) -> std::result::Result<(), ErrorKind> {
        let mut tree = self.tree_mut();
        let resolved = Self::resolve(&tree, key, true);
        match tree.entry(resolved).or_insert_with(|| Entry::File { data: Vec::new(), modified: OffsetDateTime::now_utc() }) {
            Entry::File { data, modified } => {
                data.extend_from_slice(bytes);
                *modified = OffsetDateTime::now_utc();
                Ok(())
            },
            _ => Err(ErrorKind::BackendFault(format!("{}: not a regular file", self.address_of(key)))),
        }
    }
}

/// In-memory backend for testing.
///
/// Every store is named; it resolves addresses of the form
/// `mem://<name>/path`. Cloning shares the same store.
///
/// # Examples
///
/// ```
/// use tandem_vfs::FileNode;
/// use tandem_vfs::backend::{MemoryBackend, Op};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = MemoryBackend::with_files("scratch", [("docs/readme.md", "hello")]);
/// let docs = backend.node("docs");
/// assert_eq!(docs.list().await.unwrap().len(), 1);
/// assert_eq!(backend.calls(Op::List), ["/docs"]);
/// # }
/// ```
#[derive(Clone)]
pub struct MemoryBackend {
    store: Arc<Store>,
}
impl MemoryBackend {
    /// Panics if `name` can't be used as a host. Test setup that's wrong
    /// should never pass.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let Ok(root) = FileAddress::parse(&format!("mem://{name}")) else {
            // The panic here is DELIBERATE. MemoryBackend is intended to be
            // used in tests; panics are expected. There is no error result.
            panic!("MemoryBackend::new: invalid store name {name}");
        };
        let mut tree = BTreeMap::new();
        tree.insert(Vec::new(), Entry::Dir { modified: OffsetDateTime::now_utc() });
        Self {
            store: Arc::new(Store {
                name,
                root,
                tree: RwLock::new(tree),
                journal: Mutex::new(Vec::new()),
                faults: Mutex::new(Vec::new()),
                gates: Mutex::new(Vec::new()),
                native_copy: AtomicBool::new(false),
                native_move: AtomicBool::new(true),
            }),
        }
    }

    /// Create a store pre-populated with files; parent folders are created
    /// as needed.
    pub fn with_files(
        name: impl Into<String>,
        files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>,
    ) -> Self {
        let backend = Self::new(name);
        for (path, data) in files {
            backend.add_file(path.as_ref(), data);
        }
        backend
    }

    /// Advertise [`CopyHint::UseBackendNativeCopy`] for copies within this store.
    pub fn with_native_copy(self, enabled: bool) -> Self {
        self.store.native_copy.store(enabled, Ordering::SeqCst);
        self
    }

    /// Advertise native renames for moves within this store (the default).
    pub fn with_native_move(self, enabled: bool) -> Self {
        self.store.native_move.store(enabled, Ordering::SeqCst);
        self
    }

    pub fn name(&self) -> &str {
        &self.store.name
    }

    pub fn add_dir(&self, path: &str) {
        let mut tree = self.store.tree_mut();
        let key = key(path);
        for depth in 1..=key.len() {
            tree.entry(key[..depth].to_vec()).or_insert_with(|| Entry::Dir { modified: OffsetDateTime::now_utc() });
        }
    }

    pub fn add_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let key = key(path);
        if let Some((_, parent)) = key.split_last() {
            self.add_dir(&parent.join("/"));
        }
        self.store.tree_mut().insert(key, Entry::File { data: data.into(), modified: OffsetDateTime::now_utc() });
    }

    pub fn add_symlink(&self, path: &str, target: &str) {
        self.store.tree_mut().insert(key(path), Entry::Symlink { target: key(target) });
    }

    /// Backdate (or postdate) a file or folder.
    pub fn set_modified(&self, path: &str, when: OffsetDateTime) {
        match self.store.tree_mut().get_mut(&key(path)) {
            Some(Entry::File { modified, .. } | Entry::Dir { modified }) => *modified = when,
            _ => {},
        }
    }

    /// Content of a file, if there's a file at `path`.
    pub fn read(&self, path: &str) -> Option<Vec<u8>> {
        match self.store.tree().get(&key(path)) {
            Some(Entry::File { data, .. }) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.store.tree().contains_key(&key(path))
    }

    /// Every path in the store, folders included, in sorted order.
    pub fn paths(&self) -> Vec<String> {
        self.store.tree().keys().filter(|k| !k.is_empty()).map(|k| display(k)).collect()
    }

    pub fn address(&self, path: &str) -> FileAddress {
        self.store.address_of(&key(path))
    }

    /// Handle for `path`, which need not exist.
    pub fn node(&self, path: &str) -> NodeHandle {
        let key = key(path);
        Arc::new(MemoryNode {
            store: Arc::clone(&self.store),
            address: self.store.address_of(&key),
            key,
        })
    }

    /// Fail every `op` on `path` with `kind` until told otherwise.
    pub fn fail(&self, op: Op, path: &str, kind: ErrorKind) {
        self.arm(op, path, kind, None);
    }

    /// Fail the next `times` calls of `op` on `path` with `kind`.
    pub fn fail_times(&self, op: Op, path: &str, kind: ErrorKind, times: usize) {
        self.arm(op, path, kind, Some(times));
    }

    fn arm(&self, op: Op, path: &str, kind: ErrorKind, remaining: Option<usize>) {
        self.store.faults().push(Fault { op, path: display(&key(path)), kind, remaining });
    }

    /// Stop the next reader of `path` once it has handed out `after` bytes,
    /// until the returned gate is opened.
    pub fn hold_reads(&self, path: &str, after: usize) -> ReadGate {
        let gate = ReadGate::default();
        self.store.gates.lock().unwrap_or_else(PoisonError::into_inner).push((
            display(&key(path)),
            after,
            gate.clone(),
        ));
        gate
    }

    pub fn journal(&self) -> Vec<Call> {
        self.store.journal.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Paths of every journalled call of one kind, in call order.
    pub fn calls(&self, op: Op) -> Vec<String> {
        self.journal().into_iter().filter(|c| c.op == op).map(|c| c.path).collect()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn schemes(&self) -> Vec<Scheme> {
        vec![Scheme::Memory]
    }

    fn accepts(&self, address: &FileAddress) -> bool {
        address.host() == Some(self.store.name.as_str())
    }

    async fn resolve(&self, address: &FileAddress) -> Result<NodeHandle> {
        if address.host() != Some(self.store.name.as_str()) {
            exn::bail!(ErrorKind::Unreachable(address.to_string()));
        }
        Ok(Arc::new(MemoryNode {
            store: Arc::clone(&self.store),
            address: address.clone(),
            key: address.path().to_vec(),
        }))
    }
}

/// A node inside a [`MemoryBackend`].
pub struct MemoryNode {
    store: Arc<Store>,
    address: FileAddress,
    key: Vec<String>,
}
impl MemoryNode {
    fn child_node(&self, name: &str) -> MemoryNode {
        let mut key = self.key.clone();
        key.push(name.to_string());
        MemoryNode {
            store: Arc::clone(&self.store),
            address: self.address.join(name),
            key,
        }
    }

    fn not_found(&self) -> ErrorKind {
        ErrorKind::NotFound(self.address.to_string())
    }

    fn same_store(&self, other: &dyn FileNode) -> bool {
        other.address().scheme() == &Scheme::Memory && other.address().host() == Some(self.store.name.as_str())
    }
}
impl std::fmt::Debug for MemoryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryNode").field("address", &self.address).finish()
    }
}

#[async_trait]
impl FileNode for MemoryNode {
    fn address(&self) -> &FileAddress {
        &self.address
    }

    async fn metadata(&self) -> Result<Metadata> {
        self.store.enter(Op::Metadata, &self.key)?;
        let tree = self.store.tree();
        let resolved = Store::resolve(&tree, &self.key, false);
        let (size, modified, kind) = match tree.get(&resolved) {
            None => exn::bail!(self.not_found()),
            Some(Entry::File { data, modified }) => (Some(data.len() as u64), *modified, NodeKind::Regular),
            Some(Entry::Dir { modified }) => (None, *modified, NodeKind::Directory),
            Some(Entry::Symlink { .. }) => {
                let target = Store::resolve(&tree, &resolved, true);
                let to_directory = matches!(tree.get(&target), Some(Entry::Dir { .. }));
                (None, OffsetDateTime::UNIX_EPOCH, NodeKind::Symlink { to_directory })
            },
        };
        Ok(Metadata {
            size,
            modified,
            kind,
            permissions: Permissions::READ_WRITE,
        })
    }

    async fn canonical(&self) -> Result<FileAddress> {
        let tree = self.store.tree();
        let resolved = Store::resolve(&tree, &self.key, true);
        if !tree.contains_key(&resolved) {
            exn::bail!(self.not_found());
        }
        Ok(self.store.address_of(&resolved))
    }

    fn list_stream(&self) -> NodeStream<'_> {
        Box::pin(stream! {
            // Snapshot the child names under the read lock, then drop it
            // before yielding.
            let names: Result<Vec<String>> = self.store.enter(Op::List, &self.key).and_then(|()| {
                let tree = self.store.tree();
                let resolved = Store::resolve(&tree, &self.key, true);
                match tree.get(&resolved) {
                    None => Err(self.not_found().into()),
                    Some(Entry::Dir { .. }) => Ok(tree
                        .keys()
                        .filter(|k| k.len() == resolved.len() + 1 && k.starts_with(&resolved))
                        .filter_map(|k| k.last().cloned())
                        .collect()),
                    Some(_) => Err(ErrorKind::NotADirectory(self.address.to_string()).into()),
                }
            });
            match names {
                Err(err) => yield Err(err),
                Ok(names) => for name in names {
                    yield Ok(Arc::new(self.child_node(&name)) as NodeHandle);
                },
            }
        })
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        Ok(Arc::new(self.child_node(name)))
    }

    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead> {
        self.store.enter(Op::OpenRead, &self.key)?;
        let tree = self.store.tree();
        let resolved = Store::resolve(&tree, &self.key, true);
        match tree.get(&resolved) {
            None => exn::bail!(self.not_found()),
            Some(Entry::File { data, .. }) => {
                let start = usize::try_from(offset).unwrap_or(usize::MAX).min(data.len());
                let reader = Cursor::new(data[start..].to_vec());
                let mut gates = self.store.gates.lock().unwrap_or_else(PoisonError::into_inner);
                let path = display(&self.key);
                match gates.iter().position(|(gated, ..)| *gated == path) {
                    Some(idx) => {
                        let (_, after, gate) = gates.remove(idx);
                        Ok(Box::new(HeldReader { reader, until_gate: Some(after), gate }))
                    },
                    None => Ok(Box::new(reader)),
                }
            },
            Some(_) => exn::bail!(ErrorKind::BackendFault(format!("{}: is a directory", self.address))),
        }
    }

    async fn open_write(&self, append: bool) -> Result<BoxSyncWrite> {
        self.store.enter(Op::OpenWrite, &self.key)?;
        let mut tree = self.store.tree_mut();
        let resolved = Store::resolve(&tree, &self.key, true);
        let Some((_, parent)) = resolved.split_last() else {
            exn::bail!(ErrorKind::BackendFault(format!("{}: is a directory", self.address)));
        };
        if !matches!(tree.get(parent), Some(Entry::Dir { .. })) {
            exn::bail!(ErrorKind::NotFound(self.store.address_of(parent).to_string()));
        }
        match tree.get_mut(&resolved) {
            Some(Entry::File { data, .. }) if !append => data.clear(),
            Some(Entry::File { .. }) => {},
            Some(_) => exn::bail!(ErrorKind::BackendFault(format!("{}: is a directory", self.address))),
            None => {
                tree.insert(resolved.clone(), Entry::File { data: Vec::new(), modified: OffsetDateTime::now_utc() });
            },
        }
        Ok(Box::new(MemoryWriter {
            store: Arc::clone(&self.store),
            key: resolved,
        }))
    }

    async fn delete(&self) -> Result<()> {
        self.store.enter(Op::Delete, &self.key)?;
        let mut tree = self.store.tree_mut();
        let resolved = Store::resolve(&tree, &self.key, false);
        let is_dir = match tree.get(&resolved) {
            None => exn::bail!(self.not_found()),
            Some(entry) => matches!(entry, Entry::Dir { .. }),
        };
        if is_dir && tree.keys().any(|k| k.len() > resolved.len() && k.starts_with(&resolved)) {
            exn::bail!(ErrorKind::BackendFault(format!("{}: directory not empty", self.address)));
        }
        tree.remove(&resolved);
        Ok(())
    }

    async fn mkdir(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        let child = self.child_node(name);
        self.store.enter(Op::Mkdir, &child.key)?;
        let mut tree = self.store.tree_mut();
        let parent = Store::resolve(&tree, &self.key, true);
        if !matches!(tree.get(&parent), Some(Entry::Dir { .. })) {
            exn::bail!(self.not_found());
        }
        let mut key = parent;
        key.push(name.to_string());
        if tree.contains_key(&key) {
            exn::bail!(ErrorKind::AlreadyExists(child.address.to_string()));
        }
        tree.insert(key, Entry::Dir { modified: OffsetDateTime::now_utc() });
        drop(tree);
        Ok(Arc::new(child))
    }

    async fn rename_or_move(&self, destination: &FileAddress) -> Result<()> {
        self.store.enter(Op::Rename, &self.key)?;
        if destination.scheme() != &Scheme::Memory || destination.host() != Some(self.store.name.as_str()) {
            exn::bail!(ErrorKind::BackendFault(format!("cannot move {} to {destination}", self.address)));
        }
        let mut tree = self.store.tree_mut();
        let from = Store::resolve(&tree, &self.key, false);
        let to = Store::resolve(&tree, destination.path(), false);
        if !tree.contains_key(&from) {
            exn::bail!(self.not_found());
        }
        let moved: Vec<Vec<String>> = tree.keys().filter(|k| k.starts_with(&from)).cloned().collect();
        for old in moved {
            if let Some(entry) = tree.remove(&old) {
                let mut new = to.clone();
                new.extend_from_slice(&old[from.len()..]);
                tree.insert(new, entry);
            }
        }
        Ok(())
    }

    fn copy_hint(&self, destination: &dyn FileNode) -> CopyHint {
        if self.store.native_copy.load(Ordering::SeqCst) && self.same_store(destination) {
            CopyHint::UseBackendNativeCopy
        } else {
            CopyHint::UseGenericStreamCopy
        }
    }

    async fn native_copy(&self, destination: &dyn FileNode) -> Result<()> {
        self.store.enter(Op::NativeCopy, &self.key)?;
        if !self.same_store(destination) {
            exn::bail!(ErrorKind::BackendFault(format!("cannot copy {} to {}", self.address, destination.address())));
        }
        let mut tree = self.store.tree_mut();
        let from = Store::resolve(&tree, &self.key, true);
        let Some(Entry::File { data, .. }) = tree.get(&from).cloned() else {
            exn::bail!(self.not_found());
        };
        let to = Store::resolve(&tree, destination.address().path(), true);
        tree.insert(to, Entry::File { data, modified: OffsetDateTime::now_utc() });
        Ok(())
    }

    fn move_hint(&self, destination: &dyn FileNode) -> CopyHint {
        if self.store.native_move.load(Ordering::SeqCst) && self.same_store(destination) {
            CopyHint::UseBackendNativeCopy
        } else {
            CopyHint::UseGenericStreamCopy
        }
    }
}

/// Holds a [`MemoryBackend`] reader partway through its file.
#[derive(Clone, Default)]
pub struct ReadGate {
    state: Arc<GateState>,
}

#[derive(Default)]
struct GateState {
    reached: Notify,
    open: Mutex<bool>,
    opened: Condvar,
}

impl ReadGate {
    /// Resolves once a reader is waiting at the gate.
    pub async fn reached(&self) {
        self.state.reached.notified().await;
    }

    pub fn open(&self) {
        *self.state.open.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.state.opened.notify_all();
    }

    fn wait(&self) {
        self.state.reached.notify_one();
        let mut open = self.state.open.lock().unwrap_or_else(PoisonError::into_inner);
        while !*open {
            open = self.state.opened.wait(open).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

struct HeldReader {
    reader: Cursor<Vec<u8>>,
    /// Bytes left before the gate; `None` once it has been passed.
    until_gate: Option<usize>,
    gate: ReadGate,
}
impl Read for HeldReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let limit = match self.until_gate {
            Some(0) => {
                self.gate.wait();
                self.until_gate = None;
                buf.len()
            },
            Some(left) => left.min(buf.len()),
            None => buf.len(),
        };
        let read = self.reader.read(&mut buf[..limit])?;
        if let Some(left) = &mut self.until_gate {
            *left -= read;
        }
        Ok(read)
    }
}

struct MemoryWriter {
    store: Arc<Store>,
    key: Vec<String>,
}
impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.store.append(&self.key, buf).map_err(ErrorKind::into_io)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
