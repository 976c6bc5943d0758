//! Error type for the connection/request/message layer.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Tls(String),
    Proto(shroud_proto::Error),
    Value(shroud_value::Error),
    Crypto(shroud_crypto::Error),
    Store(shroud_store::Error),
    /// The connection is not in a state that permits the attempted operation.
    WrongState(&'static str),
    /// A required head field was missing or malformed.
    MalformedHead(&'static str),
    /// No contact is known for the given account id.
    UnknownContact(u32),
    /// The request/message/resource map has no entry for this id.
    NotFound,
    /// The background worker was asked to stop.
    Cancelled,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {e}"),
            Error::Tls(s) => write!(f, "TLS error: {s}"),
            Error::Proto(e) => write!(f, "protocol error: {e}"),
            Error::Value(e) => write!(f, "value encoding error: {e}"),
            Error::Crypto(e) => write!(f, "crypto error: {e}"),
            Error::Store(e) => write!(f, "storage error: {e}"),
            Error::WrongState(s) => write!(f, "invalid state: {s}"),
            Error::MalformedHead(field) => write!(f, "malformed head: missing or invalid {field}"),
            Error::UnknownContact(id) => write!(f, "no contact with account id {id}"),
            Error::NotFound => write!(f, "not found"),
            Error::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<shroud_proto::Error> for Error {
    fn from(e: shroud_proto::Error) -> Self {
        Error::Proto(e)
    }
}

impl From<shroud_value::Error> for Error {
    fn from(e: shroud_value::Error) -> Self {
        Error::Value(e)
    }
}

impl From<shroud_crypto::Error> for Error {
    fn from(e: shroud_crypto::Error) -> Self {
        Error::Crypto(e)
    }
}

impl From<shroud_store::Error> for Error {
    fn from(e: shroud_store::Error) -> Self {
        Error::Store(e)
    }
}
