//! Read-only HTTP(S) backend.
//!
//! Metadata comes from a `HEAD` request, content from `GET`. Reads from an
//! offset send a `Range` header; servers that ignore it get the skipped
//! prefix discarded on our side. Nothing here retries: a timeout is reported
//! like any other backend fault and the caller decides.

use crate::archive::stream::SkipReader;
use crate::error::{ErrorKind, Result};
use crate::node::validate_name;
use crate::{
    Backend, BoxSyncRead, BoxSyncWrite, FileAddress, FileNode, Metadata, NodeHandle, NodeKind, NodeStream,
    Permissions, Scheme,
};
use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, HeaderMap, LAST_MODIFIED, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc2822;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::instrument;

/// Resolves `http://` and `https://` addresses.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
}
impl HttpBackend {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .or_raise(|| ErrorKind::BackendFault("failed to build HTTP client".to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Backend for HttpBackend {
    fn schemes(&self) -> Vec<Scheme> {
        vec![Scheme::Http, Scheme::Https]
    }

    async fn resolve(&self, address: &FileAddress) -> Result<NodeHandle> {
        Ok(Arc::new(HttpNode {
            client: self.client.clone(),
            address: address.clone(),
        }))
    }
}

/// A remote resource behind a URL.
#[derive(Clone, Debug)]
pub struct HttpNode {
    client: Client,
    address: FileAddress,
}
impl HttpNode {
    fn url(&self) -> &str {
        // Credentials in the userinfo part are sent as basic auth.
        self.address.canonical()
    }

    fn request_error(&self, err: &reqwest::Error) -> ErrorKind {
        if err.is_connect() {
            ErrorKind::Unreachable(self.address.to_string())
        } else if err.is_timeout() {
            ErrorKind::BackendFault(format!("{}: timed out", self.address))
        } else {
            ErrorKind::BackendFault(format!("{}: {err}", self.address))
        }
    }

    fn check(&self, response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let location = self.address.to_string();
        exn::bail!(match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => ErrorKind::NotFound(location),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::PermissionDenied(location),
            other => ErrorKind::BackendFault(format!("{location}: HTTP {other}")),
        })
    }

    fn read_only(&self) -> ErrorKind {
        ErrorKind::ReadOnlyBackend(self.address.to_string())
    }
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.parse().ok()
}

fn last_modified(headers: &HeaderMap) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(headers.get(LAST_MODIFIED)?.to_str().ok()?, &Rfc2822).ok()
}

#[async_trait]
impl FileNode for HttpNode {
    fn address(&self) -> &FileAddress {
        &self.address
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn metadata(&self) -> Result<Metadata> {
        let response = self.client.head(self.url()).send().await.map_err(|e| self.request_error(&e))?;
        let response = self.check(response)?;
        let headers = response.headers();
        Ok(Metadata {
            size: content_length(headers),
            modified: last_modified(headers).unwrap_or(OffsetDateTime::UNIX_EPOCH),
            kind: NodeKind::Regular,
            permissions: Permissions::READ_ONLY,
        })
    }

    fn list_stream(&self) -> NodeStream<'_> {
        let err = ErrorKind::NotADirectory(self.address.to_string());
        Box::pin(futures::stream::once(async move { Err(err.into()) }))
    }

    async fn child(&self, name: &str) -> Result<NodeHandle> {
        validate_name(name, &self.address)?;
        Ok(Arc::new(HttpNode {
            client: self.client.clone(),
            address: self.address.join(name),
        }))
    }

    #[instrument(level = "debug", skip(self), fields(path = %self.address))]
    async fn open_read(&self, offset: u64) -> Result<BoxSyncRead> {
        let mut request = self.client.get(self.url());
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request.send().await.map_err(|e| self.request_error(&e))?;
        if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            // Asked for bytes past the end.
            return Ok(Box::new(io::empty()));
        }
        let response = self.check(response)?;
        let skip = if offset > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
            tracing::debug!(offset, "Server ignored range request");
            offset
        } else {
            0
        };
        let body = StreamReader::new(Box::pin(response.bytes_stream().map_err(io::Error::other)));
        Ok(Box::new(SkipReader::new(SyncIoBridge::new(body), skip)))
    }

    async fn open_write(&self, _append: bool) -> Result<BoxSyncWrite> {
        exn::bail!(self.read_only())
    }

    async fn delete(&self) -> Result<()> {
        exn::bail!(self.read_only())
    }

    async fn mkdir(&self, _name: &str) -> Result<NodeHandle> {
        exn::bail!(self.read_only())
    }

    async fn rename_or_move(&self, _destination: &FileAddress) -> Result<()> {
        exn::bail!(self.read_only())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const BODY: &str = "hello, world";

    /// Serve canned responses until the listener is dropped. Honors `Range`
    /// only when `ranges` is set.
    async fn serve(ranges: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut request = Vec::new();
                let mut buf = [0; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = socket.read(&mut buf).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let request = String::from_utf8_lossy(&request).to_lowercase();
                let offset = request
                    .lines()
                    .find_map(|line| line.strip_prefix("range: bytes="))
                    .and_then(|range| range.trim_end_matches('-').parse::<usize>().ok())
                    .filter(|_| ranges);
                let response = if request.contains(" /missing ") {
                    "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                } else if request.contains(" /secret ") {
                    "HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string()
                } else {
                    let (status, body) = match offset {
                        Some(offset) => ("206 Partial Content", &BODY[offset..]),
                        None => ("200 OK", BODY),
                    };
                    let head = format!(
                        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nLast-Modified: Tue, 14 Nov 2023 22:13:20 GMT\r\nConnection: close\r\n\r\n",
                        body.len()
                    );
                    if request.starts_with("head ") { head } else { format!("{head}{body}") }
                };
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        base
    }

    async fn node(url: &str) -> NodeHandle {
        let backend = HttpBackend::new(Duration::from_secs(5), "tandem-test").unwrap();
        backend.resolve(&FileAddress::parse(url).unwrap()).await.unwrap()
    }

    async fn read(node: NodeHandle, offset: u64) -> String {
        let reader = node.open_read(offset).await.unwrap();
        tokio::task::spawn_blocking(move || {
            let mut reader = reader;
            let mut content = String::new();
            reader.read_to_string(&mut content).unwrap();
            content
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_metadata_from_head() {
        let base = serve(true).await;
        let metadata = node(&format!("{base}/file.txt")).await.metadata().await.unwrap();
        assert_eq!(metadata.size, Some(BODY.len() as u64));
        assert_eq!(metadata.modified.unix_timestamp(), 1_700_000_000);
        assert!(!metadata.permissions.writable);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_status_mapping() {
        let base = serve(true).await;
        let err = node(&format!("{base}/missing")).await.metadata().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::NotFound(_)));
        let err = node(&format!("{base}/secret")).await.open_read(0).await.err().unwrap();
        assert!(matches!(&*err, ErrorKind::PermissionDenied(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ranged_reads() {
        let base = serve(true).await;
        assert_eq!(read(node(&format!("{base}/file.txt")).await, 0).await, BODY);
        assert_eq!(read(node(&format!("{base}/file.txt")).await, 7).await, "world");

        let base = serve(false).await;
        assert_eq!(read(node(&format!("{base}/file.txt")).await, 7).await, "world");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_read_only() {
        let base = serve(true).await;
        let file = node(&format!("{base}/file.txt")).await;
        assert!(matches!(&*file.delete().await.unwrap_err(), ErrorKind::ReadOnlyBackend(_)));
        assert!(matches!(&*file.list().await.unwrap_err(), ErrorKind::NotADirectory(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/file.txt", listener.local_addr().unwrap());
        drop(listener);
        let err = node(&url).await.metadata().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Unreachable(_)));
    }
}
