//! Delegating node wrapper.
//!
//! A [`ProxyNode`] forwards every call to the node it wraps, overriding only
//! the aspects it was configured with: the address it reports, its display
//! name, or read-only mode. Wrapping never drops a capability.

use crate::error::{ErrorKind, Result};
use crate::{
    BoxSyncRead, BoxSyncReadSeek, BoxSyncWrite, CopyHint, FileAddress, FileNode, Metadata, NodeHandle, NodeStream,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

/// Wraps another node, overriding only what it was told to.
///
/// In read-only mode every mutation fails with `ReadOnlyBackend` and the
/// reported permissions lose their writable bit; children listed through a
/// read-only proxy are wrapped too.
///
/// # Examples
///
/// ```
/// use tandem_vfs::{FileNode, ProxyNode};
/// use tandem_vfs::backend::MemoryBackend;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let backend = MemoryBackend::with_files("t", [("report.bin", "...")]);
/// let renamed = ProxyNode::new(backend.node("report.bin")).with_name("Quarterly report");
/// assert_eq!(renamed.name(), "Quarterly report");
///
/// let locked = ProxyNode::new(backend.node("report.bin")).read_only();
/// assert!(locked.delete().await.is_err());
/// assert!(backend.contains("report.bin"));
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct ProxyNode {
    inner: NodeHandle,
    address: Option<FileAddress>,
    name: Option<String>,
    read_only: bool,
}
impl ProxyNode {
    pub fn new(inner: NodeHandle) -> Self {
        Self {
            inner,
            address: None,
            name: None,
            read_only: false,
        }
    }

    /// Report `address` instead of the inner node's.
    pub fn with_address(mut self, address: FileAddress) -> Self {
        self.address = Some(address);
        self
    }

    /// Report `name` instead of the inner node's.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Refuse every mutation.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn inner(&self) -> &NodeHandle {
        &self.inner
    }

    fn refuse(&self) -> Result<()> {
        if self.read_only {
            tracing::debug!(path = %self.address(), "Refusing mutation on read-only node");
            exn::bail!(ErrorKind::ReadOnlyBackend(self.address().to_string()));
        }
        Ok(())
    }

    fn wrap(&self, child: NodeHandle) -> NodeHandle {
        if self.read_only { Arc::new(ProxyNode::new(child).read_only()) } else { child }
    }
}

#[async_trait]
impl FileNode for ProxyNode {
    fn address(&self) -> &FileAddress {
        self.address.as_ref().unwrap_or_else(|| self.inner.address())
    }

    fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.inner.name())
    }

    async fn metadata(&self) -> Result<Metadata> {
        let mut metadata = self.inner.metadata().await?;
        if self.read_only {
            metadata.permissions.writable = false;
        }
        Ok(metadata)
    }

    async fn exists(&self) -> Result<bool> {
        self.inner.exists().await
    }

    async fn canonical(&self) -> Result<FileAddress> {
        self.inner.canonical().await
    }

    fn list_stream(&self) -> NodeStream<'_> {
        Box::pin(self.inner.list_stream().map(|child| child.map(|child| self.wrap(child))))
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        Ok(self.wrap(self.inner.child(name).await?))
    }

    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead> {
        self.inner.open_read(offset).await
    }

    async fn open_random_access(&self) -> Result<BoxSyncReadSeek> {
        self.inner.open_random_access().await
    }

    async fn open_write(&self, append: bool) -> Result<BoxSyncWrite> {
        self.refuse()?;
        self.inner.open_write(append).await
    }

    async fn delete(&self) -> Result<()> {
        self.refuse()?;
        self.inner.delete().await
    }

    async fn mkdir(&self, name: &str) -> Result<NodeHandle> {
        self.refuse()?;
        self.inner.mkdir(name).await
    }

    async fn rename_or_move(&self, destination: &FileAddress) -> Result<()> {
        self.refuse()?;
        self.inner.rename_or_move(destination).await
    }

    fn copy_hint(&self, destination: &dyn FileNode) -> CopyHint {
        self.inner.copy_hint(destination)
    }

    async fn native_copy(&self, destination: &dyn FileNode) -> Result<()> {
        self.inner.native_copy(destination).await
    }

    fn move_hint(&self, destination: &dyn FileNode) -> CopyHint {
        // A read-only source can't be removed, so a move has to go through
        // the copy path and fail on the delete like any other.
        if self.read_only { CopyHint::UseGenericStreamCopy } else { self.inner.move_hint(destination) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeKind;
    use crate::backend::{MemoryBackend, Op};
    use std::io::Read;

    #[tokio::test]
    async fn test_forwards_reads() {
        let backend = MemoryBackend::with_files("t", [("dir/a.txt", "alpha")]);
        let proxy = ProxyNode::new(backend.node("dir/a.txt"));
        assert_eq!(proxy.address(), &backend.address("dir/a.txt"));
        assert_eq!(proxy.name(), "a.txt");
        assert_eq!(proxy.metadata().await.unwrap().size, Some(5));
        let mut content = String::new();
        proxy.open_read(1).await.unwrap().read_to_string(&mut content).unwrap();
        assert_eq!(content, "lpha");
        assert_eq!(backend.calls(Op::OpenRead), ["/dir/a.txt"]);
    }

    #[tokio::test]
    async fn test_overrides_address_and_name() {
        let backend = MemoryBackend::with_files("t", [("a.txt", "alpha")]);
        let elsewhere = FileAddress::parse("mem://t/b.txt").unwrap();
        let proxy = ProxyNode::new(backend.node("a.txt")).with_address(elsewhere.clone());
        assert_eq!(proxy.address(), &elsewhere);
        assert_eq!(proxy.name(), "a.txt");
        assert_eq!(proxy.metadata().await.unwrap().kind, NodeKind::Regular);
    }

    #[tokio::test]
    async fn test_read_only_refuses_mutation() {
        let backend = MemoryBackend::with_files("t", [("dir/a.txt", "alpha")]);
        let proxy = ProxyNode::new(backend.node("dir")).read_only();
        assert!(!proxy.metadata().await.unwrap().permissions.writable);
        let err = proxy.mkdir("sub").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReadOnlyBackend(_)));

        let children = proxy.list().await.unwrap();
        let err = children[0].open_write(false).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::ReadOnlyBackend(_)));
        assert_eq!(backend.read("dir/a.txt").unwrap(), b"alpha");
        assert!(backend.calls(Op::OpenWrite).is_empty());
    }
}
