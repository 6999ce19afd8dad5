//! S3-compatible object storage backend.
//!
//! Addresses look like `s3://bucket/path/to/key`. Folders are emulated the
//! usual way: a listing with a `/` delimiter, plus an optional empty marker
//! object whose key ends in `/`.
//!
//! Copies within S3 are done server-side through `CopyObject`, so the
//! backend advertises [`CopyHint::UseBackendNativeCopy`] towards any other S3
//! node. Moves go through copy-then-delete, since S3 has no rename.
//!
//! # Credentials
//!
//! Credentials are provided explicitly via configuration; every bucket on
//! the endpoint is reachable with the same key pair.

use crate::error::{ErrorKind, Result};
use crate::node::validate_name;
use crate::{
    Backend, BoxSyncRead, BoxSyncWrite, CopyHint, FileAddress, FileNode, Metadata, NodeHandle, NodeKind, NodeStream,
    Permissions, Scheme,
};
use async_stream::stream;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region, retry::RetryConfig};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::{ByteStream, DateTime};
use aws_sdk_s3::Client;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::io::{self, Write};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::runtime::Handle;
use tokio_util::io::SyncIoBridge;
use tracing::instrument;

/// Characters left alone in a `CopyObject` source.
const COPY_SOURCE: &AsciiSet = &NON_ALPHANUMERIC.remove(b'/').remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Resolves `s3://` addresses against one endpoint.
///
/// # Examples
///
/// ```no_run
/// use tandem_vfs::backend::S3Backend;
///
/// # async fn example() -> tandem_vfs::error::Result<()> {
/// let backend = S3Backend::new(
///     "us-west-004",
///     Some("https://s3.us-west-004.backblazeb2.com"),
///     "access_key_id",
///     "secret_access_key",
/// )
/// .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug)]
pub struct S3Backend {
    client: Client,
}
impl S3Backend {
    /// # Arguments
    /// * `region` - AWS region or provider-specific region (e.g., "us-west-004" for Backblaze)
    /// * `endpoint` - Custom endpoint URL for S3-compatible services
    /// * `key_id` - AWS/provider access key ID
    /// * `key_secret` - AWS/provider secret access key
    pub async fn new(
        region: impl Into<String>,
        endpoint: Option<impl Into<String>>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self> {
        let credentials = Credentials::new(key_id, key_secret, None, None, "tandem-config");
        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .credentials_provider(credentials)
            .region(Region::new(region.into()))
            // Retries are the decision channel's call, not the SDK's.
            .retry_config(RetryConfig::disabled())
            // Path-style addressing for S3-compatible services (Backblaze, MinIO, etc.)
            .force_path_style(true);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Ok(Self {
            client: Client::from_conf(builder.build()),
        })
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn schemes(&self) -> Vec<Scheme> {
        vec![Scheme::S3]
    }

    async fn resolve(&self, address: &FileAddress) -> Result<NodeHandle> {
        Ok(Arc::new(S3Node::new(self.client.clone(), address.clone())?))
    }
}

/// An object (or emulated folder) in a bucket.
#[derive(Clone, Debug)]
pub struct S3Node {
    client: Client,
    address: FileAddress,
    bucket: String,
    key: String,
}

fn object_key(address: &FileAddress) -> String {
    address.path().join("/")
}

fn copy_source(bucket: &str, key: &str) -> String {
    format!("{bucket}/{}", utf8_percent_encode(key, COPY_SOURCE))
}

/// Name of a listed key relative to the folder prefix, without the trailing
/// `/` of sub-folders. `None` for the folder's own marker.
fn child_name<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let name = key.strip_prefix(prefix)?.trim_end_matches('/');
    (!name.is_empty()).then_some(name)
}

fn parse_datetime(dt: &DateTime) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(dt.as_nanos()).unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

fn s3_error<E>(err: &SdkError<E, HttpResponse>, address: &FileAddress) -> ErrorKind
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let location = address.to_string();
    match err {
        SdkError::DispatchFailure(_) => ErrorKind::Unreachable(location),
        SdkError::TimeoutError(_) => ErrorKind::BackendFault(format!("{location}: timed out")),
        _ => {
            let status = err.raw_response().map(|response| response.status().as_u16());
            match (err.code(), status) {
                (Some("NoSuchBucket"), _) => ErrorKind::Unreachable(location),
                (Some("NoSuchKey" | "NotFound"), _) | (_, Some(404)) => ErrorKind::NotFound(location),
                (Some("AccessDenied"), _) | (_, Some(401 | 403)) => ErrorKind::PermissionDenied(location),
                _ => ErrorKind::BackendFault(format!("{location}: {}", DisplayErrorContext(err))),
            }
        },
    }
}

impl S3Node {
    fn new(client: Client, address: FileAddress) -> Result<Self> {
        let Some(bucket) = address.host().map(str::to_string) else {
            exn::bail!(ErrorKind::MalformedAddress(format!("missing bucket: {address}")));
        };
        Ok(Self {
            client,
            key: object_key(&address),
            bucket,
            address,
        })
    }

    fn child_node(&self, name: &str) -> S3Node {
        let address = self.address.join(name);
        S3Node {
            client: self.client.clone(),
            key: object_key(&address),
            bucket: self.bucket.clone(),
            address,
        }
    }

    /// Prefix under which this folder's children live.
    fn prefix(&self) -> String {
        if self.key.is_empty() { String::new() } else { format!("{}/", self.key) }
    }

    fn is_s3(other: &dyn FileNode) -> bool {
        other.address().scheme() == &Scheme::S3 && other.address().entry_path().is_none()
    }

    /// Whether anything lives under this key's prefix.
    async fn has_children(&self) -> Result<bool> {
        let page = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.prefix())
            .max_keys(1)
            .send()
            .await
            .map_err(|e| s3_error(&e, &self.address))?;
        Ok(page.key_count().unwrap_or_default() > 0)
    }

    async fn put(&self, key: String, body: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| s3_error(&e, &self.address))?;
        Ok(())
    }

    async fn download(&self) -> Result<Vec<u8>> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| s3_error(&e, &self.address))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| ErrorKind::BackendFault(format!("{}: {e}", self.address)))?;
        Ok(bytes.into_bytes().to_vec())
    }

    async fn copy_to(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .copy_object()
            .bucket(bucket)
            .key(key)
            .copy_source(copy_source(&self.bucket, &self.key))
            .send()
            .await
            .map_err(|e| s3_error(&e, &self.address))?;
        Ok(())
    }
}

#[async_trait]
impl FileNode for S3Node {
    fn address(&self) -> &FileAddress {
        &self.address
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn metadata(&self) -> Result<Metadata> {
        let folder = Metadata {
            size: None,
            modified: OffsetDateTime::UNIX_EPOCH,
            kind: NodeKind::Directory,
            permissions: Permissions::READ_WRITE,
        };
        if self.key.is_empty() {
            return Ok(folder);
        }
        match self.client.head_object().bucket(&self.bucket).key(&self.key).send().await {
            Ok(head) => Ok(Metadata {
                size: head.content_length().and_then(|len| u64::try_from(len).ok()),
                modified: head.last_modified().map_or(OffsetDateTime::UNIX_EPOCH, parse_datetime),
                kind: NodeKind::Regular,
                permissions: Permissions::READ_WRITE,
            }),
            Err(err) => match s3_error(&err, &self.address) {
                ErrorKind::NotFound(_) if self.has_children().await? => Ok(folder),
                kind => exn::bail!(kind),
            },
        }
    }

    fn list_stream(&self) -> NodeStream<'_> {
        Box::pin(stream! {
            let prefix = self.prefix();
            let mut token: Option<String> = None;
            let mut found = false;
            let mut failed = false;
            loop {
                let page = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&prefix)
                    .delimiter("/")
                    .set_continuation_token(token.take())
                    .send()
                    .await;
                let page = match page {
                    Ok(page) => page,
                    Err(err) => {
                        yield Err(s3_error(&err, &self.address).into());
                        failed = true;
                        break;
                    },
                };
                found |= page.key_count().unwrap_or_default() > 0;
                let folders = page.common_prefixes().iter().filter_map(|p| p.prefix());
                let objects = page.contents().iter().filter_map(|o| o.key());
                for key in folders.chain(objects) {
                    if let Some(name) = child_name(&prefix, key) {
                        yield Ok(Arc::new(self.child_node(name)) as NodeHandle);
                    }
                }
                token = page.next_continuation_token().map(str::to_string);
                if token.is_none() {
                    break;
                }
            }
            if !found && !failed && !self.key.is_empty() {
                // Nothing under the prefix: a plain object, or nothing at all.
                yield Err(match self.metadata().await {
                    Ok(_) => ErrorKind::NotADirectory(self.address.to_string()).into(),
                    Err(err) => err,
                });
            }
        })
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        Ok(Arc::new(self.child_node(name)))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead> {
        let mut request = self.client.get_object().bucket(&self.bucket).key(&self.key);
        if offset > 0 {
            request = request.range(format!("bytes={offset}-"));
        }
        let output = match request.send().await {
            Ok(output) => output,
            Err(err) if err.code() == Some("InvalidRange") => return Ok(Box::new(io::empty())),
            Err(err) => exn::bail!(s3_error(&err, &self.address)),
        };
        Ok(Box::new(SyncIoBridge::new(Box::pin(output.body.into_async_read()))))
    }

    /// The object is uploaded in one piece when the writer is flushed;
    /// appending downloads the current content first.
    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn open_write(&self, append: bool) -> Result<BoxSyncWrite> {
        let buffer = if append {
            match self.download().await {
                Ok(existing) => existing,
                Err(err) if matches!(&*err, ErrorKind::NotFound(_)) => Vec::new(),
                Err(err) => return Err(err),
            }
        } else {
            Vec::new()
        };
        Ok(Box::new(S3Writer {
            node: self.clone(),
            handle: Handle::current(),
            buffer,
        }))
    }

    async fn delete(&self) -> Result<()> {
        let is_folder = self.metadata().await?.kind.is_directory();
        if is_folder && self.list().await.is_ok_and(|children| !children.is_empty()) {
            exn::bail!(ErrorKind::BackendFault(format!("{}: directory not empty", self.address)));
        }
        let key = if is_folder { self.prefix() } else { self.key.clone() };
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| s3_error(&e, &self.address))?;
        Ok(())
    }

    async fn mkdir(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        let child = self.child_node(name);
        if child.exists().await? {
            exn::bail!(ErrorKind::AlreadyExists(child.address.to_string()));
        }
        self.put(child.prefix(), Vec::new()).await?;
        Ok(Arc::new(child))
    }

    async fn rename_or_move(&self, destination: &FileAddress) -> Result<()> {
        if destination.scheme() != &Scheme::S3 || destination.entry_path().is_some() {
            exn::bail!(ErrorKind::BackendFault(format!("cannot move {} to {destination}", self.address)));
        }
        let Some(bucket) = destination.host() else {
            exn::bail!(ErrorKind::MalformedAddress(format!("missing bucket: {destination}")));
        };
        self.copy_to(bucket, &object_key(destination)).await?;
        self.delete().await
    }

    fn copy_hint(&self, destination: &dyn FileNode) -> CopyHint {
        if Self::is_s3(destination) { CopyHint::UseBackendNativeCopy } else { CopyHint::UseGenericStreamCopy }
    }

    #[instrument(level = "debug", skip_all, fields(path = %self.address, destination = %destination.address()))]
    async fn native_copy(&self, destination: &dyn FileNode) -> Result<()> {
        let target = destination.address();
        match target.host() {
            Some(bucket) if Self::is_s3(destination) => self.copy_to(bucket, &object_key(target)).await,
            _ => exn::bail!(ErrorKind::BackendFault(format!("cannot copy {} to {target}", self.address))),
        }
    }
}

/// Buffers everything written and uploads it on flush.
struct S3Writer {
    node: S3Node,
    handle: Handle,
    buffer: Vec<u8>,
}
impl Write for S3Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let body = self.buffer.clone();
        self.handle
            .block_on(self.node.put(self.node.key.clone(), body))
            .map_err(|err| (*err).clone().into_io())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    async fn node(raw: &str) -> S3Node {
        let backend = S3Backend::new("us-east-1", Some("http://127.0.0.1:9"), "key", "secret").await.unwrap();
        S3Node::new(backend.client, FileAddress::parse(raw).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_bucket_and_key() {
        let file = node("s3://library/fandom/work.html.bz2").await;
        assert_eq!(file.bucket, "library");
        assert_eq!(file.key, "fandom/work.html.bz2");
        assert_eq!(file.prefix(), "fandom/work.html.bz2/");

        let root = node("s3://library").await;
        assert_eq!(root.key, "");
        assert_eq!(root.prefix(), "");
        assert_eq!(root.child_node("fandom").key, "fandom");
    }

    #[tokio::test]
    async fn test_copy_hint_only_towards_s3() {
        let source = node("s3://library/a.txt").await;
        let other_bucket = node("s3://archive/a.txt").await;
        assert_eq!(source.copy_hint(&other_bucket), CopyHint::UseBackendNativeCopy);
        assert_eq!(source.move_hint(&other_bucket), CopyHint::UseGenericStreamCopy);
        let local = crate::backend::LocalNode::from_path("/tmp/a.txt").unwrap();
        assert_eq!(source.copy_hint(&local), CopyHint::UseGenericStreamCopy);
    }

    #[rstest]
    #[case("fandom/work.html", "library/fandom/work.html")]
    #[case("notes & drafts/ch 1.txt", "library/notes%20%26%20drafts/ch%201.txt")]
    fn test_copy_source(#[case] key: &str, #[case] expected: &str) {
        assert_eq!(copy_source("library", key), expected);
    }

    #[rstest]
    #[case("fandom/", "fandom/work.html", Some("work.html"))]
    #[case("fandom/", "fandom/series/", Some("series"))]
    #[case("fandom/", "fandom/", None)]
    #[case("", "top.txt", Some("top.txt"))]
    fn test_child_name(#[case] prefix: &str, #[case] key: &str, #[case] expected: Option<&str>) {
        assert_eq!(child_name(prefix, key), expected);
    }

    #[tokio::test]
    async fn test_missing_bucket_is_malformed() {
        let backend = S3Backend::new("us-east-1", None::<String>, "key", "secret").await.unwrap();
        let err = S3Node::new(backend.client, FileAddress::parse("/local/path").unwrap()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::MalformedAddress(_)));
    }
}
