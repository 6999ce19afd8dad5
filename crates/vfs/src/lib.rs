//! Virtual file layer.
//!
//! Local disks, archives, remote protocols and in-memory stores all look the
//! same to callers: a [`FileAddress`] is resolved through a [`Registry`] into
//! a [`NodeHandle`], and every node offers the same [`FileNode`] capability
//! set (metadata, listing, blocking streams, mutation, copy/move hints).
//!
//! Archives are browsed through [`ArchiveNode`], and [`ProxyNode`] lets
//! composite backends override a single aspect of another node.

mod address;
pub mod archive;
pub mod backend;
pub mod error;
mod fileset;
mod node;
mod registry;

pub use crate::address::{Credentials, FileAddress, Scheme};
pub use crate::archive::{ArchiveEntry, ArchiveEntryNode, ArchiveNode};
pub use crate::backend::ProxyNode;
pub use crate::fileset::FileSet;
pub use crate::node::{
    BoxSyncRead, BoxSyncReadSeek, BoxSyncWrite, CopyHint, FileNode, Metadata, NodeHandle, NodeKind, NodeStream,
    Permissions, ReadSeek,
};
pub use crate::registry::{Backend, Registry};
