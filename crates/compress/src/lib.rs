//! Compression layers and container formats.
//!
//! The virtual file layer only ever *reads* compressed data: a `.bz2` file is
//! browsed as a folder holding one entry, a `.tar.gz` as a tarball behind a
//! gzip decoder. This crate answers two questions for it:
//!
//! - what is this file? ([`ArchiveFormat::from_name`],
//!   [`ArchiveFormat::from_magic_bytes`], [`Compression::from_extension`])
//! - how do I read through it? ([`Compression::decoder`])
//!
//! Bzip2 and Gzip are always available; XZ and Zstd sit behind the `xz` and
//! `zstd` features. [`Compression::encode`] exists so tests and doc examples
//! can build fixtures.

mod archive;
mod codec;
mod detect;
pub mod error;

use derive_more::Display;

pub use crate::archive::ArchiveFormat;

/// A compression layer wrapped around a file's content.
#[derive(Clone, Copy, Debug, Default, Display, PartialEq, Eq, Hash)]
pub enum Compression {
    #[default]
    #[display("none")]
    None,
    #[display("bzip2")]
    Bzip2,
    #[display("gzip")]
    Gzip,
    #[cfg(feature = "xz")]
    #[display("xz")]
    Xz,
    #[cfg(feature = "zstd")]
    #[display("zstd")]
    Zstd,
}
