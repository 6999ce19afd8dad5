use super::{ArchiveInner, read_only};
use crate::error::{ErrorKind, Result};
use crate::node::validate_name;
use crate::{BoxSyncRead, BoxSyncWrite, FileAddress, FileNode, Metadata, NodeHandle, NodeKind, NodeStream, Permissions};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::instrument;

/// A file or folder inside an archive. Always read-only.
#[derive(Clone)]
pub struct ArchiveEntryNode {
    archive: Arc<ArchiveInner>,
    path: Vec<String>,
    address: FileAddress,
}
impl ArchiveEntryNode {
    pub(crate) fn new(archive: Arc<ArchiveInner>, path: Vec<String>, address: FileAddress) -> Self {
        Self { archive, path, address }
    }

    /// Path relative to the archive root.
    pub fn entry_path(&self) -> &[String] {
        &self.path
    }
}
impl std::fmt::Debug for ArchiveEntryNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntryNode").field("address", &self.address).finish()
    }
}

#[async_trait]
impl FileNode for ArchiveEntryNode {
    fn address(&self) -> &FileAddress {
        &self.address
    }

    async fn metadata(&self) -> Result<Metadata> {
        let entry = self.archive.find(&self.path, &self.address).await?;
        Ok(Metadata {
            size: entry.size(),
            modified: entry.modified(),
            kind: if entry.is_dir() { NodeKind::Directory } else { NodeKind::Regular },
            permissions: Permissions::READ_ONLY,
        })
    }

    fn list_stream(&self) -> NodeStream<'_> {
        self.archive.children(&self.path, &self.address)
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        let mut path = self.path.clone();
        path.push(name.to_string());
        Ok(Arc::new(Self::new(Arc::clone(&self.archive), path, self.address.join(name))))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead> {
        let entry = self.archive.find(&self.path, &self.address).await?;
        self.archive.open_entry(entry, offset, &self.address).await
    }

    async fn open_write(&self, _append: bool) -> Result<BoxSyncWrite> {
        exn::bail!(read_only(&self.address))
    }

    async fn delete(&self) -> Result<()> {
        exn::bail!(read_only(&self.address))
    }

    async fn mkdir(&self, _name: &str) -> Result<NodeHandle> {
        exn::bail!(read_only(&self.address))
    }

    async fn rename_or_move(&self, destination: &FileAddress) -> Result<()> {
        exn::bail!(ErrorKind::ReadOnlyBackend(format!("{} (moving to {destination})", self.address)))
    }
}
