//! Address resolution.
//!
//! The [`Registry`] is the one place that turns a [`FileAddress`] into a
//! node: it picks a [`Backend`] by scheme, and opens archives for addresses
//! that point inside one. It is an explicit value handed to whoever needs
//! it, so tests can assemble one from in-memory stores.

use crate::error::{ErrorKind, Result};
use crate::{ArchiveNode, FileAddress, NodeHandle, ProxyNode, Scheme};
use crate::backend::LocalBackend;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::instrument;

/// A source of nodes for one or more schemes.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Schemes this backend resolves.
    fn schemes(&self) -> Vec<Scheme>;

    /// Whether this backend serves `address`. Lets several backends share a
    /// scheme, split by host (one per bucket, one per in-memory store).
    fn accepts(&self, _address: &FileAddress) -> bool {
        true
    }

    /// Node for an address outside any archive.
    async fn resolve(&self, address: &FileAddress) -> Result<NodeHandle>;
}

/// Maps addresses to nodes.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use tandem_vfs::{FileNode, Registry};
/// use tandem_vfs::backend::MemoryBackend;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = MemoryBackend::with_files("scratch", [("notes/todo.txt", "milk")]);
/// let mut registry = Registry::new();
/// registry.register(Arc::new(store));
///
/// let node = registry.resolve_str("mem://scratch/notes/todo.txt").await.unwrap();
/// assert_eq!(node.metadata().await.unwrap().size, Some(4));
/// # }
/// ```
pub struct Registry {
    backends: HashMap<Scheme, Vec<Arc<dyn Backend>>>,
    read_only: HashSet<Scheme>,
    sniff_archives: bool,
}
impl Registry {
    /// A registry serving the local filesystem.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(LocalBackend));
        registry
    }

    /// A registry with no backends at all.
    pub fn empty() -> Self {
        Self {
            backends: HashMap::new(),
            read_only: HashSet::new(),
            sniff_archives: true,
        }
    }

    /// Add a backend for every scheme it declares. Later registrations are
    /// consulted first.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> &mut Self {
        for scheme in backend.schemes() {
            tracing::debug!(%scheme, "Registering backend");
            self.backends.entry(scheme).or_default().insert(0, Arc::clone(&backend));
        }
        self
    }

    /// Whether archives with unrecognised names are identified by content.
    pub fn archive_sniffing(mut self, enabled: bool) -> Self {
        self.sniff_archives = enabled;
        self
    }

    /// Hand out nodes of `scheme` behind a read-only wrapper.
    pub fn read_only(mut self, scheme: Scheme) -> Self {
        self.read_only.insert(scheme);
        self
    }

    pub fn sniffs_archives(&self) -> bool {
        self.sniff_archives
    }

    pub fn supports(&self, scheme: &Scheme) -> bool {
        self.backends.get(scheme).is_some_and(|backends| !backends.is_empty())
    }

    /// Resolve an address to a node, which need not exist.
    ///
    /// Addresses inside an archive resolve the container first, then open it
    /// as an [`ArchiveNode`].
    #[instrument(level = "debug", skip(self), fields(%address))]
    pub async fn resolve(&self, address: &FileAddress) -> Result<NodeHandle> {
        if let Some(entry) = address.entry_path() {
            let container = Box::pin(self.resolve(&address.archive_file())).await?;
            let archive = ArchiveNode::open_with(container, self.sniff_archives).await?;
            return Ok(archive.entry_node(entry));
        }
        let Some(backend) = self
            .backends
            .get(address.scheme())
            .and_then(|backends| backends.iter().find(|backend| backend.accepts(address)))
        else {
            exn::bail!(ErrorKind::UnsupportedScheme(address.scheme().to_string()));
        };
        let node = backend.resolve(address).await?;
        if self.read_only.contains(address.scheme()) {
            return Ok(Arc::new(ProxyNode::new(node).read_only()));
        }
        Ok(node)
    }

    /// Parse then [`resolve()`](Self::resolve).
    pub async fn resolve_str(&self, raw: &str) -> Result<NodeHandle> {
        self.resolve(&FileAddress::parse(raw)?).await
    }
}
impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut schemes: Vec<&str> = self.backends.keys().map(Scheme::as_str).collect();
        schemes.sort_unstable();
        f.debug_struct("Registry")
            .field("schemes", &schemes)
            .field("sniff_archives", &self.sniff_archives)
            .finish()
    }
}
