//! Recognising a compression layer by name or content.

use crate::Compression;

const BZIP2_MAGIC: &[u8] = b"BZh";
const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
#[cfg(feature = "xz")]
const XZ_MAGIC: &[u8] = &[0xFD, b'7', b'z', b'X', b'Z', 0x00];
#[cfg(feature = "zstd")]
const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];

impl Compression {
    /// The layer a file extension (without the dot) stands for. Extensions
    /// of formats whose feature is off are not recognised.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "bz2" => Some(Self::Bzip2),
            "gz" => Some(Self::Gzip),
            #[cfg(feature = "xz")]
            "xz" => Some(Self::Xz),
            #[cfg(feature = "zstd")]
            "zst" => Some(Self::Zstd),
            _ => None,
        }
    }

    /// The layer a file's first bytes announce; [`None`](Self::None) when
    /// they announce nothing.
    #[must_use]
    pub fn from_magic_bytes(head: &[u8]) -> Self {
        let known: &[(&[u8], Self)] = &[
            (BZIP2_MAGIC, Self::Bzip2),
            (GZIP_MAGIC, Self::Gzip),
            #[cfg(feature = "xz")]
            (XZ_MAGIC, Self::Xz),
            #[cfg(feature = "zstd")]
            (ZSTD_MAGIC, Self::Zstd),
        ];
        known
            .iter()
            .find(|(magic, _)| head.starts_with(magic))
            .map_or(Self::None, |(_, compression)| *compression)
    }

    /// Whether `head` is what a stream of this layer starts with. Anything
    /// passes for [`None`](Self::None).
    #[must_use]
    pub fn check_magic_bytes(&self, head: &[u8]) -> bool {
        *self == Self::None || Self::from_magic_bytes(head) == *self
    }
}
