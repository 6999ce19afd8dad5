//! Blocking reader adapters for archive entry streams.
//!
//! Every entry stream is layered the same way: the container's raw bytes go
//! through [`SourceReader`], which labels backend failures with their
//! [`ErrorKind`]; decoders sit on top; and [`DecodeReader`] is outermost,
//! turning anything that isn't already labelled into `CorruptArchive`.

use crate::FileAddress;
use crate::error::ErrorKind;
use std::io::{self, Read};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whether an I/O error already carries one of our kinds.
pub(crate) fn is_labelled(err: &io::Error) -> bool {
    err.get_ref().is_some_and(|inner| inner.is::<ErrorKind>())
}

/// Classify an error raised while decoding: labelled errors keep their
/// kind, everything else means the container is broken.
pub(crate) fn decode_error(err: &io::Error, address: &FileAddress) -> ErrorKind {
    if is_labelled(err) {
        ErrorKind::io(err, address)
    } else {
        ErrorKind::CorruptArchive(format!("{address}: {err}"))
    }
}

/// Labels errors from the container's own reader, so they aren't mistaken
/// for decoder faults further up.
pub(crate) struct SourceReader<R> {
    inner: R,
    address: FileAddress,
}
impl<R: Read> SourceReader<R> {
    pub(crate) fn new(inner: R, address: FileAddress) -> Self {
        Self { inner, address }
    }
}
impl<R: Read> Read for SourceReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|err| {
            if is_labelled(&err) { err } else { ErrorKind::io(&err, &self.address).into_io() }
        })
    }
}

/// Outermost layer of an entry stream. Unlabelled errors and decoder panics
/// both come out as `CorruptArchive`; after a panic the stream stays failed.
pub(crate) struct DecodeReader<R> {
    inner: R,
    address: FileAddress,
    poisoned: bool,
}
impl<R: Read> DecodeReader<R> {
    pub(crate) fn new(inner: R, address: FileAddress) -> Self {
        Self {
            inner,
            address,
            poisoned: false,
        }
    }

    fn corrupt(&self, detail: impl std::fmt::Display) -> io::Error {
        ErrorKind::CorruptArchive(format!("{}: {detail}", self.address)).into_io()
    }
}
impl<R: Read> Read for DecodeReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.poisoned {
            return Err(self.corrupt("decoder failed earlier"));
        }
        match catch_unwind(AssertUnwindSafe(|| self.inner.read(buf))) {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(err)) if is_labelled(&err) => Err(err),
            Ok(Err(err)) => Err(self.corrupt(err)),
            Err(_) => {
                self.poisoned = true;
                tracing::warn!(path = %self.address, "Decoder panicked");
                Err(self.corrupt("decoder panicked"))
            },
        }
    }
}

/// Discards the first `skip` bytes of `inner` on the first read.
pub(crate) struct SkipReader<R> {
    inner: R,
    skip: u64,
}
impl<R: Read> SkipReader<R> {
    pub(crate) fn new(inner: R, skip: u64) -> Self {
        Self { inner, skip }
    }
}
impl<R: Read> Read for SkipReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.skip > 0 {
            let skipped = io::copy(&mut (&mut self.inner).take(self.skip), &mut io::sink())?;
            self.skip -= skipped;
            if self.skip > 0 {
                // Source ended inside the skipped region.
                self.skip = 0;
                return Ok(0);
            }
        }
        self.inner.read(buf)
    }
}

/// Exclusive claim on a container that can only serve one stream at a time.
/// Released when dropped.
pub(crate) struct BusyGuard {
    flag: Arc<AtomicBool>,
}
impl BusyGuard {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: Arc::clone(flag) })
    }
}
impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// A reader holding a [`BusyGuard`] for as long as it lives.
pub(crate) struct GuardedReader<R> {
    inner: R,
    _guard: BusyGuard,
}
impl<R: Read> GuardedReader<R> {
    pub(crate) fn new(inner: R, guard: BusyGuard) -> Self {
        Self { inner, _guard: guard }
    }
}
impl<R: Read> Read for GuardedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn address() -> FileAddress {
        FileAddress::parse("/tmp/broken.tar.gz").unwrap()
    }

    struct Failing(io::ErrorKind);
    impl Read for Failing {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::from(self.0))
        }
    }

    struct Panicking;
    impl Read for Panicking {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            panic!("decoder bug")
        }
    }

    #[test]
    fn test_skip_reader() {
        let mut out = String::new();
        SkipReader::new(Cursor::new("hello world"), 6).read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");

        let mut out = Vec::new();
        SkipReader::new(Cursor::new("short"), 100).read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_source_errors_keep_their_kind() {
        let reader = SourceReader::new(Failing(io::ErrorKind::PermissionDenied), address());
        let mut decoded = DecodeReader::new(reader, address());
        let err = decoded.read(&mut [0; 8]).unwrap_err();
        assert!(matches!(ErrorKind::io(&err, &address()), ErrorKind::PermissionDenied(_)));
    }

    #[test]
    fn test_decoder_errors_become_corrupt() {
        let mut decoded = DecodeReader::new(Failing(io::ErrorKind::UnexpectedEof), address());
        let err = decoded.read(&mut [0; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(matches!(ErrorKind::io(&err, &address()), ErrorKind::CorruptArchive(_)));
    }

    #[test]
    fn test_decoder_panic_becomes_corrupt() {
        let mut decoded = DecodeReader::new(Panicking, address());
        assert!(matches!(ErrorKind::io(&decoded.read(&mut [0; 8]).unwrap_err(), &address()), ErrorKind::CorruptArchive(_)));
        assert!(decoded.read(&mut [0; 8]).is_err());
    }

    #[test]
    fn test_busy_guard_is_exclusive() {
        let flag = Arc::new(AtomicBool::new(false));
        let guard = BusyGuard::acquire(&flag).unwrap();
        assert!(BusyGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(BusyGuard::acquire(&flag).is_some());
    }
}
