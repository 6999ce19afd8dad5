//! Browsing archives as folders.
//!
//! An [`ArchiveNode`] wraps the node holding a container (zip, tar,
//! compressed tar, or a single compressed file) and presents its content as
//! a tree of read-only [`ArchiveEntryNode`]s. The listing is parsed once,
//! on first use, and kept for the lifetime of the archive node.
//!
//! Zip and plain tar entries are read straight out of the container, so any
//! number of entry streams can be open at once. Everything wrapped in a
//! compression layer has to be decoded from the start for every entry; those
//! containers serve a single live stream and refuse a second one with
//! `ConcurrentAccessUnsupported`.

mod entry;
mod index;
pub(crate) mod stream;

pub use self::entry::ArchiveEntryNode;
pub use self::index::ArchiveEntry;

use self::index::{Location, ZipMethod};
use self::stream::{BusyGuard, DecodeReader, GuardedReader, SkipReader, SourceReader};
use crate::error::{ErrorKind, Result};
use crate::node::validate_name;
use crate::{
    BoxSyncRead, BoxSyncWrite, FileAddress, FileNode, Metadata, NodeHandle, NodeKind, NodeStream, Permissions,
    ProxyNode,
};
use async_stream::stream;
use async_trait::async_trait;
use bzip2::read::BzDecoder;
use flate2::read::DeflateDecoder;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tandem_compress::{ArchiveFormat, Compression};
use tokio::sync::OnceCell;
use tracing::instrument;

pub(crate) struct ArchiveInner {
    container: NodeHandle,
    format: ArchiveFormat,
    entries: OnceCell<Vec<ArchiveEntry>>,
    busy: Arc<AtomicBool>,
}

fn read_only(address: &FileAddress) -> ErrorKind {
    ErrorKind::ReadOnlyBackend(address.to_string())
}

async fn blocking<T, F>(address: &FileAddress, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&FileAddress) -> Result<T> + Send + 'static,
{
    let owned = address.clone();
    tokio::task::spawn_blocking(move || work(&owned))
        .await
        .map_err(|e| ErrorKind::CorruptArchive(format!("{address}: {e}")))?
}

/// Leading bytes of a node's content.
async fn read_head(node: &dyn FileNode) -> Result<Vec<u8>> {
    let reader = node.open_read(0).await?;
    blocking(node.address(), move |address| {
        let mut head = Vec::with_capacity(ArchiveFormat::SNIFF_LEN);
        reader
            .take(ArchiveFormat::SNIFF_LEN as u64)
            .read_to_end(&mut head)
            .map_err(|e| ErrorKind::io(&e, address))?;
        Ok(head)
    })
    .await
}

impl ArchiveInner {
    async fn entries(&self) -> Result<&Vec<ArchiveEntry>> {
        self.entries.get_or_try_init(|| self.load()).await
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.container.address(), format = %self.format))]
    async fn load(&self) -> Result<Vec<ArchiveEntry>> {
        let modified = self.container.metadata().await?.modified;
        let entries = match self.format {
            ArchiveFormat::Zip => {
                let source = self.container.open_random_access().await?;
                blocking(self.container.address(), move |address| index::list_zip(source, address, modified)).await?
            },
            ArchiveFormat::Tar | ArchiveFormat::CompressedTar(_) => {
                let source = self.container.open_read(0).await?;
                let compression = self.format.compression();
                blocking(self.container.address(), move |address| {
                    index::list_tar(source, compression, address, modified)
                })
                .await?
            },
            ArchiveFormat::Single(_) => index::list_single(self.format.entry_name(&self.container.name()), modified),
        };
        tracing::debug!(entries = entries.len(), "Parsed archive listing");
        Ok(entries)
    }

    async fn find(&self, path: &[String], address: &FileAddress) -> Result<&ArchiveEntry> {
        match self.entries().await?.iter().find(|entry| entry.path() == path) {
            Some(entry) => Ok(entry),
            None => exn::bail!(ErrorKind::NotFound(address.to_string())),
        }
    }

    fn claim(&self, address: &FileAddress) -> Result<BusyGuard> {
        match BusyGuard::acquire(&self.busy) {
            Some(guard) => Ok(guard),
            None => {
                tracing::warn!(path = %address, "Archive already has a live entry stream");
                exn::bail!(ErrorKind::ConcurrentAccessUnsupported(address.to_string()))
            },
        }
    }

    /// Container stream from `offset`, with backend errors labelled.
    async fn source(&self, offset: u64) -> Result<SourceReader<BoxSyncRead>> {
        let raw = self.container.open_read(offset).await?;
        Ok(SourceReader::new(raw, self.container.address().clone()))
    }

    async fn open_entry(&self, entry: &ArchiveEntry, offset: u64, address: &FileAddress) -> Result<BoxSyncRead> {
        let size = entry.size().unwrap_or_default();
        match (&entry.location, self.format) {
            (Location::None, _) => {
                exn::bail!(ErrorKind::BackendFault(format!("{address}: is a directory")))
            },
            (Location::Zip { start, compressed, method }, _) => {
                let reader: Box<dyn Read + Send> = match method {
                    ZipMethod::Stored => {
                        let skip = offset.min(*compressed);
                        Box::new(self.source(start + skip).await?.take(compressed - skip))
                    },
                    ZipMethod::Deflated => Box::new(SkipReader::new(
                        DeflateDecoder::new(self.source(*start).await?.take(*compressed)),
                        offset,
                    )),
                    ZipMethod::Bzip2 => Box::new(SkipReader::new(
                        BzDecoder::new(self.source(*start).await?.take(*compressed)),
                        offset,
                    )),
                    ZipMethod::Unsupported(method) => {
                        exn::bail!(ErrorKind::CorruptArchive(format!("{address}: unsupported zip method {method}")))
                    },
                };
                Ok(Box::new(DecodeReader::new(reader, address.clone())))
            },
            (Location::Tar { position }, ArchiveFormat::Tar) => {
                let skip = offset.min(size);
                let reader = self.source(position + skip).await?.take(size - skip);
                Ok(Box::new(DecodeReader::new(reader, address.clone())))
            },
            (Location::Tar { position }, format) => {
                let guard = self.claim(address)?;
                let decoded = self.decoded(format.compression(), address).await?;
                let reader = SkipReader::new(decoded, position + offset.min(size)).take(size - offset.min(size));
                Ok(Box::new(GuardedReader::new(DecodeReader::new(reader, address.clone()), guard)))
            },
            (Location::Single, format) => {
                let guard = self.claim(address)?;
                let decoded = self.decoded(format.compression(), address).await?;
                let reader = SkipReader::new(decoded, offset);
                Ok(Box::new(GuardedReader::new(DecodeReader::new(reader, address.clone()), guard)))
            },
        }
    }

    async fn decoded(&self, compression: Compression, address: &FileAddress) -> Result<Box<dyn Read + Send>> {
        let source = self.source(0).await?;
        compression.decoder(source).map_err(|e| ErrorKind::compression(e, address))
    }

    /// Nodes for the entries directly below `path`.
    async fn child_nodes(self: &Arc<Self>, path: &[String], address: &FileAddress) -> Result<Vec<NodeHandle>> {
        let listing = self.entries().await?;
        if !path.is_empty() {
            match listing.iter().find(|entry| entry.path() == path) {
                None => exn::bail!(ErrorKind::NotFound(address.to_string())),
                Some(entry) if !entry.is_dir() => exn::bail!(ErrorKind::NotADirectory(address.to_string())),
                Some(_) => {},
            }
        }
        Ok(listing
            .iter()
            .filter(|entry| entry.path().len() == path.len() + 1 && entry.path().starts_with(path))
            .map(|entry| {
                let node = ArchiveEntryNode::new(Arc::clone(self), entry.path().to_vec(), address.join(entry.name()));
                Arc::new(node) as NodeHandle
            })
            .collect())
    }

    fn children<'a>(self: &'a Arc<Self>, path: &'a [String], address: &'a FileAddress) -> NodeStream<'a> {
        Box::pin(stream! {
            match self.child_nodes(path, address).await {
                Err(err) => yield Err(err),
                Ok(children) => for child in children {
                    yield Ok(child);
                },
            }
        })
    }
}

/// A container presented as a read-only folder.
///
/// # Examples
///
/// ```
/// use tandem_vfs::{ArchiveNode, FileNode};
/// use tandem_vfs::backend::MemoryBackend;
/// use tandem_compress::Compression;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let compressed = Compression::Bzip2.encode(b"quarterly figures").unwrap();
/// let backend = MemoryBackend::with_files("t", [("report.bz2", compressed)]);
///
/// let archive = ArchiveNode::open(backend.node("report.bz2")).await.unwrap();
/// let entries = archive.list().await.unwrap();
/// assert_eq!(entries[0].name(), "report");
/// # }
/// ```
#[derive(Clone)]
pub struct ArchiveNode {
    inner: Arc<ArchiveInner>,
    address: FileAddress,
}
impl ArchiveNode {
    /// Open `container`, detecting its format from its name or, failing
    /// that, its first bytes.
    pub async fn open(container: NodeHandle) -> Result<Self> {
        Self::open_with(container, true).await
    }

    /// Like [`open()`](Self::open); `sniff` controls whether content is
    /// inspected when the name says nothing.
    ///
    /// A name that promises a compression layer is checked against the
    /// content's magic bytes, so a mislabelled file is reported as corrupt
    /// here instead of failing on the first entry read.
    #[instrument(skip(container), fields(path = %container.address()))]
    pub async fn open_with(container: NodeHandle, sniff: bool) -> Result<Self> {
        let format = match ArchiveFormat::from_name(&container.name()) {
            Some(format) => {
                let compression = format.compression();
                if compression != Compression::None && !compression.check_magic_bytes(&read_head(&*container).await?)
                {
                    exn::bail!(ErrorKind::CorruptArchive(format!(
                        "{}: content is not {compression}",
                        container.address()
                    )));
                }
                format
            },
            None if sniff => match ArchiveFormat::from_magic_bytes(&read_head(&*container).await?) {
                Some(format) => format,
                None => exn::bail!(ErrorKind::CorruptArchive(format!(
                    "{}: not a recognised archive",
                    container.address()
                ))),
            },
            None => exn::bail!(ErrorKind::CorruptArchive(format!(
                "{}: not a recognised archive name",
                container.address()
            ))),
        };
        tracing::debug!(%format, "Opened archive");
        Ok(Self::with_format(container, format))
    }

    /// Treat `container` as `format` without any checks.
    pub fn with_format(container: NodeHandle, format: ArchiveFormat) -> Self {
        let address = container.address().entry::<String>(&[]);
        let container: NodeHandle = Arc::new(ProxyNode::new(container).read_only());
        Self {
            inner: Arc::new(ArchiveInner {
                container,
                format,
                entries: OnceCell::new(),
                busy: Arc::new(AtomicBool::new(false)),
            }),
            address,
        }
    }

    pub fn format(&self) -> ArchiveFormat {
        self.inner.format
    }

    /// The node holding the archive, behind a read-only wrapper.
    pub fn container(&self) -> &NodeHandle {
        &self.inner.container
    }

    /// Every entry, parents before children. Parsed on first call.
    pub async fn entries(&self) -> Result<&[ArchiveEntry]> {
        self.inner.entries().await.map(Vec::as_slice)
    }

    /// Handle for the entry at `path` (the root itself when empty), which
    /// need not exist.
    pub fn entry_node(&self, path: &[String]) -> NodeHandle {
        if path.is_empty() {
            return Arc::new(self.clone());
        }
        let address = self.address.entry(path);
        Arc::new(ArchiveEntryNode::new(Arc::clone(&self.inner), path.to_vec(), address))
    }
}
impl std::fmt::Debug for ArchiveNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveNode")
            .field("address", &self.address)
            .field("format", &self.inner.format)
            .finish()
    }
}

#[async_trait]
impl FileNode for ArchiveNode {
    fn address(&self) -> &FileAddress {
        &self.address
    }

    fn name(&self) -> String {
        self.inner.container.name()
    }

    async fn metadata(&self) -> Result<Metadata> {
        let container = self.inner.container.metadata().await?;
        Ok(Metadata {
            size: None,
            modified: container.modified,
            kind: NodeKind::Directory,
            permissions: Permissions::READ_ONLY,
        })
    }

    async fn exists(&self) -> Result<bool> {
        self.inner.container.exists().await
    }

    fn list_stream(&self) -> NodeStream<'_> {
        self.inner.children(&[], &self.address)
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        Ok(Arc::new(ArchiveEntryNode::new(
            Arc::clone(&self.inner),
            vec![name.to_string()],
            self.address.join(name),
        )))
    }

    async fn open_read(&self, _offset: u64) -> Result<BoxSyncRead> {
        exn::bail!(ErrorKind::BackendFault(format!("{}: is a directory", self.address)))
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

    async fn rename_or_move(&self, _destination: &FileAddress) -> Result<()> {
        exn::bail!(read_only(&self.address))
    }
}
