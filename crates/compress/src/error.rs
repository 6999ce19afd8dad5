//! Compression Error Types
//!
//! The virtual file layer raises these into its own `CorruptArchive` kind,
//! so the decoder's frame stays underneath in the error tree.

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A decoder or encoder could not be set up.
    #[display("unable to set up {_0} codec")]
    Codec(#[error(not(source))] String),
    /// The input isn't valid for the format it claims to be.
    #[display("invalid or corrupted data")]
    InvalidData,
    /// Writing encoded output failed.
    #[display("I/O error")]
    Io,
}

#[cfg(test)]
mod tests {
    use super::*;
    use exn::ResultExt;

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::Codec("zstd".to_string()).to_string(), "unable to set up zstd codec");
        assert_eq!(ErrorKind::InvalidData.to_string(), "invalid or corrupted data");
    }

    #[test]
    fn test_raise_keeps_the_cause() {
        let failed: std::result::Result<(), std::io::Error> = Err(std::io::Error::other("disk full"));
        let err = failed.or_raise(|| ErrorKind::Io).unwrap_err();
        assert_eq!(*err, ErrorKind::Io);
    }
}
