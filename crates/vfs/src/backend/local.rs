//! Local filesystem backend.
//!
//! Nodes map one-to-one onto native paths and use `tokio::fs` for the async
//! side; the blocking readers and writers handed out are plain `std::fs::File`s.

use crate::error::{ErrorKind, Result};
use crate::node::validate_name;
use crate::{
    Backend, BoxSyncRead, BoxSyncReadSeek, BoxSyncWrite, CopyHint, FileAddress, FileNode, Metadata, NodeHandle,
    NodeKind, NodeStream, Permissions, Scheme,
};
use async_stream::stream;
use async_trait::async_trait;
use exn::OptionExt;
use std::io::{BufReader, BufWriter, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::fs;
use tokio::io::AsyncSeekExt;
use tracing::instrument;

/// Resolves `file://` and plain absolute paths.
#[derive(Clone, Debug, Default)]
pub struct LocalBackend;

#[async_trait]
impl Backend for LocalBackend {
    fn schemes(&self) -> Vec<Scheme> {
        vec![Scheme::Local]
    }

    async fn resolve(&self, address: &FileAddress) -> Result<NodeHandle> {
        Ok(Arc::new(LocalNode::new(address.clone())?))
    }
}

/// A file, folder or link on a local disk.
///
/// # Examples
///
/// ```no_run
/// use tandem_vfs::FileNode;
/// use tandem_vfs::backend::LocalNode;
///
/// # async fn example() -> tandem_vfs::error::Result<()> {
/// let logs = LocalNode::from_path("/var/log")?;
/// for child in logs.list().await? {
///     println!("{}", child.name());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct LocalNode {
    address: FileAddress,
    path: PathBuf,
}
impl LocalNode {
    pub fn new(address: FileAddress) -> Result<Self> {
        let path = address
            .to_local_path()
            .ok_or_raise(|| ErrorKind::MalformedAddress(format!("not a local path: {address}")))?;
        Ok(Self { address, path })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(FileAddress::local(path)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn child_node(&self, name: &str) -> LocalNode {
        LocalNode {
            address: self.address.join(name),
            path: self.path.join(name),
        }
    }

    fn map_io_error(&self, err: std::io::Error) -> ErrorKind {
        ErrorKind::io(&err, &self.address)
    }
}

fn modified(metadata: &std::fs::Metadata) -> OffsetDateTime {
    metadata.modified().map(OffsetDateTime::from).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

#[cfg(unix)]
fn permissions(metadata: &std::fs::Metadata) -> Permissions {
    use std::os::unix::fs::PermissionsExt;
    Permissions {
        readable: metadata.permissions().mode() & 0o400 != 0,
        writable: !metadata.permissions().readonly(),
    }
}

#[cfg(not(unix))]
fn permissions(metadata: &std::fs::Metadata) -> Permissions {
    Permissions {
        readable: true,
        writable: !metadata.permissions().readonly(),
    }
}

/// Whether `destination` would land on the same device as `source`, i.e.
/// whether a rename can move it. The destination usually doesn't exist yet,
/// so its nearest existing ancestor decides.
#[cfg(unix)]
fn same_device(source: &Path, destination: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let Ok(source) = std::fs::symlink_metadata(source) else {
        return false;
    };
    destination
        .ancestors()
        .find_map(|ancestor| std::fs::metadata(ancestor).ok())
        .is_some_and(|destination| destination.dev() == source.dev())
}

#[cfg(not(unix))]
fn same_device(source: &Path, destination: &Path) -> bool {
    source.components().next() == destination.components().next()
}

#[async_trait]
impl FileNode for LocalNode {
    fn address(&self) -> &FileAddress {
        &self.address
    }

    #[instrument(level = "trace", skip(self), fields(path = %self.address))]
    async fn metadata(&self) -> Result<Metadata> {
        let link = fs::symlink_metadata(&self.path).await.map_err(|e| self.map_io_error(e))?;
        if link.file_type().is_symlink() {
            // Report the target's attributes, but keep the link kind. A
            // dangling link is still a link.
            let target = fs::metadata(&self.path).await.ok();
            let to_directory = target.as_ref().is_some_and(|t| t.is_dir());
            let source = target.as_ref().unwrap_or(&link);
            return Ok(Metadata {
                size: (!to_directory).then(|| source.len()),
                modified: modified(source),
                kind: NodeKind::Symlink { to_directory },
                permissions: permissions(source),
            });
        }
        Ok(Metadata {
            size: (!link.is_dir()).then(|| link.len()),
            modified: modified(&link),
            kind: if link.is_dir() { NodeKind::Directory } else { NodeKind::Regular },
            permissions: permissions(&link),
        })
    }

    async fn exists(&self) -> Result<bool> {
        // `try_exists` follows links; a dangling link still exists to us.
        match fs::symlink_metadata(&self.path).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.map_io_error(err).into()),
        }
    }

    async fn canonical(&self) -> Result<FileAddress> {
        let resolved = fs::canonicalize(&self.path).await.map_err(|e| self.map_io_error(e))?;
        FileAddress::local(resolved)
    }

    fn list_stream(&self) -> NodeStream<'_> {
        Box::pin(stream! {
            match fs::read_dir(&self.path).await {
                Err(err) => yield Err(exn::Exn::from(self.map_io_error(err))),
                Ok(mut entries) => loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => {
                            let name = entry.file_name().to_string_lossy().into_owned();
                            yield Ok(Arc::new(self.child_node(&name)) as NodeHandle);
                        },
                        Ok(None) => break,
                        Err(err) => {
                            yield Err(exn::Exn::from(self.map_io_error(err)));
                            break;
                        },
                    }
                },
            }
        })
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        Ok(Arc::new(self.child_node(name)))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead> {
        let mut file = fs::File::open(&self.path).await.map_err(|e| self.map_io_error(e))?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await.map_err(|e| self.map_io_error(e))?;
        }
        Ok(Box::new(BufReader::new(file.into_std().await)))
    }

    async fn open_random_access(&self) -> Result<BoxSyncReadSeek> {
        let file = fs::File::open(&self.path).await.map_err(|e| self.map_io_error(e))?;
        Ok(Box::new(BufReader::new(file.into_std().await)))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn open_write(&self, append: bool) -> Result<BoxSyncWrite> {
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(&self.path)
            .await
            .map_err(|e| self.map_io_error(e))?;
        Ok(Box::new(BufWriter::new(file.into_std().await)))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn delete(&self) -> Result<()> {
        let metadata = fs::symlink_metadata(&self.path).await.map_err(|e| self.map_io_error(e))?;
        if metadata.is_dir() {
            fs::remove_dir(&self.path).await.map_err(|e| self.map_io_error(e))?;
        } else {
            fs::remove_file(&self.path).await.map_err(|e| self.map_io_error(e))?;
        }
        Ok(())
    }

    async fn mkdir(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        let child = self.child_node(name);
        fs::create_dir(&child.path).await.map_err(|e| child.map_io_error(e))?;
        Ok(Arc::new(child))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address, to = %destination))]
    async fn rename_or_move(&self, destination: &FileAddress) -> Result<()> {
        let target = destination
            .to_local_path()
            .ok_or_raise(|| ErrorKind::BackendFault(format!("cannot move {} to {destination}", self.address)))?;
        fs::rename(&self.path, &target).await.map_err(|e| self.map_io_error(e))?;
        Ok(())
    }

    fn move_hint(&self, destination: &dyn FileNode) -> CopyHint {
        match destination.address().to_local_path() {
            Some(target) if same_device(&self.path, &target) => CopyHint::UseBackendNativeCopy,
            _ => CopyHint::UseGenericStreamCopy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};

    fn node(dir: &tempfile::TempDir, relative: &str) -> LocalNode {
        LocalNode::from_path(dir.path().join(relative)).unwrap()
    }

    #[test]
    fn test_new_requires_local_address() {
        assert!(LocalNode::new(FileAddress::parse("http://example.com/x").unwrap()).is_err());
        assert!(LocalNode::from_path("relative/path").is_err());
    }

    #[tokio::test]
    async fn test_write_then_read_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let file = node(&dir, "file.txt");
        let mut writer = file.open_write(false).await.unwrap();
        writer.write_all(b"0123456789").unwrap();
        writer.flush().unwrap();
        drop(writer);

        let mut reader = file.open_read(4).await.unwrap();
        let mut rest = String::new();
        reader.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "456789");

        let mut writer = file.open_write(true).await.unwrap();
        writer.write_all(b"AB").unwrap();
        writer.flush().unwrap();
        drop(writer);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"0123456789AB");

        let metadata = file.metadata().await.unwrap();
        assert_eq!(metadata.size, Some(12));
        assert_eq!(metadata.kind, NodeKind::Regular);
        assert!(metadata.permissions.writable);
    }

    #[tokio::test]
    async fn test_list_mkdir_delete() {
        let dir = tempfile::tempdir().unwrap();
        let root = node(&dir, "");
        let sub = root.mkdir("sub").await.unwrap();
        assert_eq!(sub.metadata().await.unwrap().kind, NodeKind::Directory);
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let mut names: Vec<String> = root.list().await.unwrap().iter().map(|n| n.name()).collect();
        names.sort();
        assert_eq!(names, ["a.txt", "sub"]);

        sub.delete().await.unwrap();
        assert!(!sub.exists().await.unwrap());
        let err = sub.metadata().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_of_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let err = node(&dir, "a.txt").list().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotADirectory(_)));
    }

    #[tokio::test]
    async fn test_rename_and_move_hint() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.txt"), b"data").unwrap();
        let old = node(&dir, "old.txt");
        let new = node(&dir, "new.txt");
        assert_eq!(old.move_hint(&new), CopyHint::UseBackendNativeCopy);
        assert_eq!(old.copy_hint(&new), CopyHint::UseGenericStreamCopy);
        old.rename_or_move(new.address()).await.unwrap();
        assert!(!old.exists().await.unwrap());
        assert_eq!(std::fs::read(new.path()).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_metadata_and_canonical() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("target")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("target"), dir.path().join("link")).unwrap();
        let link = node(&dir, "link");
        assert_eq!(link.metadata().await.unwrap().kind, NodeKind::Symlink { to_directory: true });
        let canonical = link.canonical().await.unwrap();
        assert_eq!(canonical, FileAddress::local(std::fs::canonicalize(dir.path().join("target")).unwrap()).unwrap());

        link.delete().await.unwrap();
        assert!(dir.path().join("target").exists());
    }
}
