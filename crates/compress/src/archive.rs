//! Container formats the virtual file layer can browse.

use crate::Compression;
use std::fmt::{Display, Formatter, Result as FmtResult};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];
// An empty zip is nothing but its end-of-central-directory record.
const ZIP_EMPTY_MAGIC: [u8; 4] = [0x50, 0x4B, 0x05, 0x06];
const TAR_MAGIC: &[u8] = b"ustar";
const TAR_MAGIC_OFFSET: usize = 257;

/// A browsable container format.
///
/// Seekable formats ([`Zip`](Self::Zip), [`Tar`](Self::Tar)) can serve any
/// number of independent entry streams. The compressed variants have to be
/// decoded from the start for every entry, so only one entry stream can be
/// live at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveFormat {
    /// Zip archive with a central directory.
    Zip,
    /// Uncompressed tarball.
    Tar,
    /// Tarball inside a compression stream (`.tar.gz`, `.tar.bz2`, ...).
    CompressedTar(Compression),
    /// A single compressed file (`.gz`, `.bz2`, and the `.tgz`/`.tbz2`
    /// shorthands), exposed as one entry.
    Single(Compression),
}

impl ArchiveFormat {
    /// How many leading bytes [`from_magic_bytes`](Self::from_magic_bytes)
    /// wants to see to recognise every format.
    pub const SNIFF_LEN: usize = 512;

    /// Detect the format from a file name.
    ///
    /// # Examples
    ///
    /// ```
    /// use tandem_compress::{ArchiveFormat, Compression};
    ///
    /// assert_eq!(ArchiveFormat::from_name("photos.zip"), Some(ArchiveFormat::Zip));
    /// assert_eq!(ArchiveFormat::from_name("src.tar.gz"), Some(ArchiveFormat::CompressedTar(Compression::Gzip)));
    /// assert_eq!(ArchiveFormat::from_name("archive.tbz2"), Some(ArchiveFormat::Single(Compression::Bzip2)));
    /// assert_eq!(ArchiveFormat::from_name("notes.txt"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_lowercase();
        let (stem, ext) = lower.rsplit_once('.')?;
        if stem.is_empty() {
            return None;
        }
        match ext {
            "zip" | "jar" => Some(ArchiveFormat::Zip),
            "tar" => Some(ArchiveFormat::Tar),
            "tgz" => Some(ArchiveFormat::Single(Compression::Gzip)),
            "tbz2" | "tbz" => Some(ArchiveFormat::Single(Compression::Bzip2)),
            #[cfg(feature = "xz")]
            "txz" => Some(ArchiveFormat::Single(Compression::Xz)),
            other => {
                let compression = Compression::from_extension(other)?;
                if stem.ends_with(".tar") {
                    Some(ArchiveFormat::CompressedTar(compression))
                } else {
                    Some(ArchiveFormat::Single(compression))
                }
            },
        }
    }

    /// Detect the format from the first bytes of a file's content.
    ///
    /// A compressed tarball can't be told apart from any other compressed
    /// file without decoding it, so compression magic always yields
    /// [`Single`](Self::Single).
    #[must_use]
    pub fn from_magic_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(&ZIP_MAGIC) || bytes.starts_with(&ZIP_EMPTY_MAGIC) {
            return Some(ArchiveFormat::Zip);
        }
        if bytes.get(TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + TAR_MAGIC.len()) == Some(TAR_MAGIC) {
            return Some(ArchiveFormat::Tar);
        }
        match Compression::from_magic_bytes(bytes) {
            Compression::None => None,
            compression => Some(ArchiveFormat::Single(compression)),
        }
    }

    /// The compression layer wrapping the container, if any.
    #[must_use]
    pub fn compression(&self) -> Compression {
        match self {
            ArchiveFormat::Zip | ArchiveFormat::Tar => Compression::None,
            ArchiveFormat::CompressedTar(c) | ArchiveFormat::Single(c) => *c,
        }
    }

    /// Whether entries can be read without decoding everything before them.
    #[must_use]
    pub fn is_seekable(&self) -> bool {
        matches!(self, ArchiveFormat::Zip | ArchiveFormat::Tar)
    }

    /// Name of the single entry inside a [`Single`](Self::Single) container
    /// called `container`.
    ///
    /// The compression suffix is stripped, and the tarball shorthands turn
    /// back into `.tar`. Names without a recognised suffix are kept as-is.
    ///
    /// # Examples
    ///
    /// ```
    /// use tandem_compress::{ArchiveFormat, Compression};
    ///
    /// let format = ArchiveFormat::Single(Compression::Bzip2);
    /// assert_eq!(format.entry_name("report.bz2"), "report");
    /// assert_eq!(format.entry_name("archive.tbz2"), "archive.tar");
    /// ```
    #[must_use]
    pub fn entry_name(&self, container: &str) -> String {
        let Some((stem, ext)) = container.rsplit_once('.') else {
            return container.to_string();
        };
        if stem.is_empty() {
            return container.to_string();
        }
        match ext.to_lowercase().as_str() {
            "tgz" | "tbz2" | "tbz" | "txz" => format!("{stem}.tar"),
            other if Compression::from_extension(other).is_some() => stem.to_string(),
            _ => container.to_string(),
        }
    }
}

impl Display for ArchiveFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ArchiveFormat::Zip => write!(f, "zip"),
            ArchiveFormat::Tar => write!(f, "tar"),
            ArchiveFormat::CompressedTar(c) => write!(f, "tar+{c}"),
            ArchiveFormat::Single(c) => write!(f, "{c}"),
        }
    }
}
