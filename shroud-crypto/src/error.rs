use std::fmt;

#[derive(Debug)]
pub enum Error {
    Random(getrandom::Error),
    InvalidKey,
    UnsupportedKeySize(usize),
    MessageTooLong,
    InvalidPadding,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Random(e) => write!(f, "random number generator failed: {e}"),
            Error::InvalidKey => write!(f, "malformed key component"),
            Error::UnsupportedKeySize(bits) => write!(f, "unsupported RSA key size: {bits} bits"),
            Error::MessageTooLong => write!(f, "message too long for key size"),
            Error::InvalidPadding => write!(f, "invalid PKCS#1 padding"),
        }
    }
}

impl std::error::Error for Error {}

impl From<getrandom::Error> for Error {
    fn from(e: getrandom::Error) -> Self {
        Error::Random(e)
    }
}
