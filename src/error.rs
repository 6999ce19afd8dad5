//! Command Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("unable to load configuration")]
    Config,
    #[display("not a usable address: {_0}")]
    Address(#[error(not(source))] String),
    #[display("unable to open {_0}")]
    Resolve(#[error(not(source))] String),
    #[display("unable to set up backend {_0}")]
    Backend(#[error(not(source))] String),
    #[display("unable to start job")]
    Job,
}
