use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    Truncated,
    UnknownTag(u8),
    InvalidUtf8,
    RootNotContainer,
    DuplicateKey(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated value buffer"),
            Error::UnknownTag(t) => write!(f, "unknown value tag: {t}"),
            Error::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
            Error::RootNotContainer => write!(f, "decoded root is not an object or array"),
            Error::DuplicateKey(k) => write!(f, "duplicate object key: {k}"),
        }
    }
}

impl std::error::Error for Error {}
