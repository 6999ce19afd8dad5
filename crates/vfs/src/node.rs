//! The uniform file abstraction every backend implements.

use crate::FileAddress;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::fmt::Debug;
use std::io::{Cursor, Read, Seek, Write};
use std::pin::Pin;
use std::sync::Arc;
use time::OffsetDateTime;

/// Shared handle to any file node.
pub type NodeHandle = Arc<dyn FileNode>;
/// Lazy listing of a folder's children.
pub type NodeStream<'a> = Pin<Box<dyn Stream<Item = Result<NodeHandle>> + Send + 'a>>;
/// Blocking reader, for use inside [`spawn_blocking`](tokio::task::spawn_blocking).
pub type BoxSyncRead = Box<dyn Read + Send + 'static>;
/// Blocking writer, for use inside [`spawn_blocking`](tokio::task::spawn_blocking).
pub type BoxSyncWrite = Box<dyn Write + Send + 'static>;
/// Blocking reader that can also seek.
pub type BoxSyncReadSeek = Box<dyn ReadSeek + 'static>;

pub trait ReadSeek: Read + Seek + Send {}
impl<T: Read + Seek + Send> ReadSeek for T {}

/// What sort of thing a node is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Regular,
    Directory,
    /// A symbolic link; `to_directory` tells whether its target is a folder
    /// (and so whether a walk could descend into it).
    Symlink { to_directory: bool },
}
impl NodeKind {
    /// Whether the node can be listed.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, NodeKind::Directory | NodeKind::Symlink { to_directory: true })
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        matches!(self, NodeKind::Symlink { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Permissions {
    pub readable: bool,
    pub writable: bool,
}
impl Permissions {
    pub const READ_ONLY: Self = Self { readable: true, writable: false };
    pub const READ_WRITE: Self = Self { readable: true, writable: true };
}

/// Snapshot of a node's attributes, read from the backend at call time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Metadata {
    /// Size in bytes; `None` when the backend can't tell (compressed
    /// single-file archives, chunked HTTP responses).
    pub size: Option<u64>,
    pub modified: OffsetDateTime,
    pub kind: NodeKind,
    pub permissions: Permissions,
}

/// How bytes should move between two nodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CopyHint {
    /// Read from the source, write to the destination.
    UseGenericStreamCopy,
    /// The source's backend can do it without the bytes passing through us.
    UseBackendNativeCopy,
}

/// A file, folder or link on some backend.
///
/// All methods are reads against the backend's state at call time; nothing
/// is cached except archive listings. Blocking readers and writers returned
/// by the `open_*` methods must be driven from a blocking context.
///
/// # Examples
///
/// ```
/// use futures::TryStreamExt;
/// use tandem_vfs::{FileNode, error::Result};
///
/// async fn total_size(folder: &dyn FileNode) -> Result<u64> {
///     let mut total = 0;
///     let mut children = folder.list_stream();
///     while let Some(child) = children.try_next().await? {
///         total += child.metadata().await?.size.unwrap_or(0);
///     }
///     Ok(total)
/// }
/// ```
#[async_trait]
pub trait FileNode: Send + Sync + Debug {
    fn address(&self) -> &FileAddress;

    /// Display name; the last segment of the address unless overridden.
    fn name(&self) -> String {
        self.address().name().unwrap_or_default().to_string()
    }

    /// Fails with `NotFound` for a missing file on a reachable backend, and
    /// `Unreachable` when the backend itself is gone.
    async fn metadata(&self) -> Result<Metadata>;

    async fn exists(&self) -> Result<bool> {
        match self.metadata().await {
            Ok(_) => Ok(true),
            Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Address with symbolic links resolved.
    async fn canonical(&self) -> Result<FileAddress> {
        Ok(self.address().clone())
    }

    /// Stream the children of a folder. Fails with `NotADirectory` or
    /// `PermissionDenied`.
    fn list_stream(&self) -> NodeStream<'_>;

    /// Collect [`list_stream()`](Self::list_stream) into a [`Vec`].
    async fn list(&self) -> Result<Vec<NodeHandle>> {
        self.list_stream().try_collect().await
    }

    /// Handle for a child of this folder, which need not exist yet.
    async fn child(&self, name: &str) -> Result<NodeHandle>;

    /// Open for reading, skipping the first `offset` bytes.
    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead>;

    /// Open for random access. The default buffers the whole content in
    /// memory; backends with real seekable handles override it.
    async fn open_random_access(&self) -> Result<BoxSyncReadSeek> {
        let mut reader = self.open_read(0).await?;
        let address = self.address().clone();
        let buffer = tokio::task::spawn_blocking(move || {
            let mut buffer = Vec::new();
            reader.read_to_end(&mut buffer).map(|_| buffer).map_err(|e| ErrorKind::io(&e, &address))
        })
        .await
        .map_err(|e| ErrorKind::BackendFault(format!("{}: {e}", self.address())))??;
        Ok(Box::new(Cursor::new(buffer)))
    }

    /// Open for writing, creating the file if needed. Without `append` any
    /// existing content is truncated. Callers must `flush()` before dropping.
    async fn open_write(&self, append: bool) -> Result<BoxSyncWrite>;

    /// Remove a file, link, or empty folder.
    async fn delete(&self) -> Result<()>;

    /// Create a folder called `name` inside this one.
    async fn mkdir(&self, name: &str) -> Result<NodeHandle>;

    /// Rename or move within the same backend.
    async fn rename_or_move(&self, destination: &FileAddress) -> Result<()>;

    /// How a copy of this node to `destination` should be performed.
    fn copy_hint(&self, _destination: &dyn FileNode) -> CopyHint {
        CopyHint::UseGenericStreamCopy
    }

    /// Copy this file to `destination` without streaming it through the
    /// caller. Only called when [`copy_hint()`](Self::copy_hint) said so.
    async fn native_copy(&self, destination: &dyn FileNode) -> Result<()> {
        exn::bail!(ErrorKind::BackendFault(format!(
            "native copy from {} to {} is not supported",
            self.address(),
            destination.address()
        )))
    }

    /// Whether [`rename_or_move()`](Self::rename_or_move) can move this node
    /// to `destination`, or the move has to be a copy followed by a delete.
    fn move_hint(&self, _destination: &dyn FileNode) -> CopyHint {
        CopyHint::UseGenericStreamCopy
    }
}

/// Reject child names that would escape the folder they're joined onto.
pub(crate) fn validate_name(name: &str, parent: &FileAddress) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        exn::bail!(ErrorKind::MalformedAddress(format!("invalid name '{name}' in {parent}")));
    }
    Ok(())
}
