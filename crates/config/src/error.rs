//! Configuration Error Types

use derive_more::{Display, Error};
use std::path::PathBuf;

/// A configuration error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for configuration loading.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A configuration file was asked for explicitly but isn't there.
    #[display("configuration file not found: {}", _0.display())]
    NotFound(#[error(not(source))] PathBuf),
    /// A layer could not be read or doesn't fit the expected shape.
    #[display("unable to parse configuration")]
    Parse,
    /// Every layer parsed, but the merged values make no sense.
    #[display("invalid configuration: {_0}")]
    Invalid(#[error(not(source))] String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_display() {
        assert_eq!(
            ErrorKind::NotFound(PathBuf::from("/etc/tandem.toml")).to_string(),
            "configuration file not found: /etc/tandem.toml"
        );
        assert_eq!(
            ErrorKind::Invalid("jobs.max_concurrent must be at least 1".to_string()).to_string(),
            "invalid configuration: jobs.max_concurrent must be at least 1"
        );
    }
}
