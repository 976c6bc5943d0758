use std::fmt;

#[derive(Debug)]
pub enum Error {
    Truncated,
    HeadTooLarge(usize),
    BodyTooLarge(usize),
    UnknownKind(u32),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Truncated => write!(f, "truncated packet frame"),
            Error::HeadTooLarge(n) => write!(f, "head length {n} exceeds maximum"),
            Error::BodyTooLarge(n) => write!(f, "body length {n} exceeds maximum"),
            Error::UnknownKind(k) => write!(f, "unknown packet kind: {k}"),
            Error::Io(e) => write!(f, "packet I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
