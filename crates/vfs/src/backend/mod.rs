//! Backend implementations.
//!
//! Each backend resolves addresses of one or more [`Scheme`](crate::Scheme)s
//! into nodes. The local filesystem is always available; the in-memory store
//! is behind the `mock` feature, remote protocols behind their own features.

#[cfg(feature = "http")]
mod http;
mod local;
#[cfg(any(test, feature = "mock"))]
mod memory;
mod proxy;
#[cfg(feature = "s3")]
mod s3;

#[cfg(feature = "http")]
pub use self::http::{HttpBackend, HttpNode};
pub use self::local::{LocalBackend, LocalNode};
#[cfg(any(test, feature = "mock"))]
pub use self::memory::{Call, MemoryBackend, MemoryNode, Op, ReadGate};
pub use self::proxy::ProxyNode;
#[cfg(feature = "s3")]
pub use self::s3::{S3Backend, S3Node};
