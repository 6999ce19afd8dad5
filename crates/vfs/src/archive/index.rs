//! Building an archive's entry listing.
//!
//! All parsing is blocking and runs inside `spawn_blocking`. Each format
//! records just enough about where an entry's data lives to reopen a stream
//! for it later without parsing the container again.

use super::stream::{DecodeReader, SourceReader, decode_error};
use crate::error::{ErrorKind, Result};
use crate::{BoxSyncRead, BoxSyncReadSeek, FileAddress};
use std::collections::BTreeSet;
use tandem_compress::Compression;
use time::{Date, Month, OffsetDateTime, PrimitiveDateTime, Time};
use zip::CompressionMethod;
use zip::result::ZipError;

/// How a zip member's bytes are encoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ZipMethod {
    Stored,
    Deflated,
    Bzip2,
    Unsupported(String),
}
impl From<CompressionMethod> for ZipMethod {
    fn from(method: CompressionMethod) -> Self {
        match method {
            CompressionMethod::Stored => ZipMethod::Stored,
            CompressionMethod::Deflated => ZipMethod::Deflated,
            CompressionMethod::Bzip2 => ZipMethod::Bzip2,
            other => ZipMethod::Unsupported(format!("{other:?}")),
        }
    }
}

/// Where an entry's data lives inside its container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Location {
    /// Folders, explicit or synthesized.
    None,
    /// Raw member data at `start` in the container, `compressed` bytes long.
    Zip { start: u64, compressed: u64, method: ZipMethod },
    /// Data at `position` in the (decompressed) tar stream.
    Tar { position: u64 },
    /// The whole decompressed stream.
    Single,
}

/// One virtual file or folder inside an archive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveEntry {
    path: Vec<String>,
    size: Option<u64>,
    modified: OffsetDateTime,
    is_dir: bool,
    pub(crate) location: Location,
}
impl ArchiveEntry {
    /// Path relative to the archive root.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.last().map(String::as_str).unwrap_or_default()
    }

    /// Uncompressed size, unknown for single-stream containers.
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn modified(&self) -> OffsetDateTime {
        self.modified
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn folder(path: Vec<String>, modified: OffsetDateTime) -> Self {
        Self {
            path,
            size: None,
            modified,
            is_dir: true,
            location: Location::None,
        }
    }
}

fn split(name: &str) -> Vec<String> {
    name.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .map(str::to_string)
        .collect()
}

/// Add folder entries for every parent that has no header of its own, and
/// sort so parents come before their children.
pub(crate) fn synthesize_parents(mut entries: Vec<ArchiveEntry>, modified: OffsetDateTime) -> Vec<ArchiveEntry> {
    let known: BTreeSet<Vec<String>> = entries.iter().map(|e| e.path.clone()).collect();
    let mut missing = BTreeSet::new();
    for entry in &entries {
        for depth in 1..entry.path.len() {
            let parent = &entry.path[..depth];
            if !known.contains(parent) {
                missing.insert(parent.to_vec());
            }
        }
    }
    entries.extend(missing.into_iter().map(|path| ArchiveEntry::folder(path, modified)));
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

fn zip_error(err: ZipError, address: &FileAddress) -> ErrorKind {
    match err {
        ZipError::Io(err) => decode_error(&err, address),
        other => ErrorKind::CorruptArchive(format!("{address}: {other}")),
    }
}

fn zip_time(when: zip::DateTime) -> Option<OffsetDateTime> {
    let month = Month::try_from(when.month()).ok()?;
    let date = Date::from_calendar_date(i32::from(when.year()), month, when.day()).ok()?;
    let time = Time::from_hms(when.hour(), when.minute(), when.second()).ok()?;
    Some(PrimitiveDateTime::new(date, time).assume_utc())
}

/// Read a zip's central directory.
pub(crate) fn list_zip(
    source: BoxSyncReadSeek,
    address: &FileAddress,
    fallback: OffsetDateTime,
) -> Result<Vec<ArchiveEntry>> {
    let mut archive = zip::ZipArchive::new(source).map_err(|e| zip_error(e, address))?;
    let mut entries = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let member = archive.by_index_raw(idx).map_err(|e| zip_error(e, address))?;
        let path = split(member.name());
        if path.is_empty() || path.iter().any(|s| s == "..") {
            tracing::debug!(path = %address, name = member.name(), "Ignoring zip member with unsafe name");
            continue;
        }
        let is_dir = member.is_dir();
        entries.push(ArchiveEntry {
            path,
            size: (!is_dir).then(|| member.size()),
            modified: zip_time(member.last_modified()).unwrap_or(fallback),
            is_dir,
            location: if is_dir {
                Location::None
            } else {
                Location::Zip {
                    start: member.data_start(),
                    compressed: member.compressed_size(),
                    method: member.compression().into(),
                }
            },
        });
    }
    Ok(synthesize_parents(entries, fallback))
}

/// Scan a tar stream block by block. `compression` is the layer wrapping
/// the tarball, if any.
pub(crate) fn list_tar(
    source: BoxSyncRead,
    compression: Compression,
    address: &FileAddress,
    fallback: OffsetDateTime,
) -> Result<Vec<ArchiveEntry>> {
    let source = SourceReader::new(source, address.clone());
    let decoded = compression.decoder(source).map_err(|e| ErrorKind::compression(e, address))?;
    let mut archive = tar::Archive::new(DecodeReader::new(decoded, address.clone()));
    let mut entries = Vec::new();
    for member in archive.entries().map_err(|e| decode_error(&e, address))? {
        let member = member.map_err(|e| decode_error(&e, address))?;
        let header = member.header();
        let kind = header.entry_type();
        let is_dir = kind.is_dir();
        if !is_dir && !kind.is_file() && !kind.is_gnu_sparse() {
            tracing::debug!(path = %address, kind = ?kind, "Ignoring tar member that is neither file nor folder");
            continue;
        }
        let name = member.path().map_err(|e| decode_error(&e, address))?;
        let path = split(&name.to_string_lossy());
        if path.is_empty() || path.iter().any(|s| s == "..") {
            tracing::debug!(path = %address, name = %name.display(), "Ignoring tar member with unsafe name");
            continue;
        }
        let modified = header
            .mtime()
            .ok()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(i64::try_from(secs).ok()?).ok())
            .unwrap_or(fallback);
        entries.push(ArchiveEntry {
            path,
            size: (!is_dir).then(|| member.size()),
            modified,
            is_dir,
            location: if is_dir { Location::None } else { Location::Tar { position: member.raw_file_position() } },
        });
    }
    Ok(synthesize_parents(entries, fallback))
}

/// The one synthetic entry of a single-stream container.
pub(crate) fn list_single(name: String, modified: OffsetDateTime) -> Vec<ArchiveEntry> {
    vec![ArchiveEntry {
        path: vec![name],
        size: None,
        modified,
        is_dir: false,
        location: Location::Single,
    }]
}
