use std::fmt;

#[derive(Debug)]
pub enum Error {
    FileExists,
    FileNotFound,
    WrongPassword,
    Sqlite(rusqlite::Error),
    Value(shroud_value::Error),
    Crypto(shroud_crypto::Error),
    UnknownColumn(String),
    NotFound,
    RejectedConfigKey(String),
    NoOpenBlob(u32),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::FileExists => write!(f, "storage file already exists"),
            Error::FileNotFound => write!(f, "storage file does not exist"),
            Error::WrongPassword => write!(f, "incorrect password"),
            Error::Sqlite(e) => write!(f, "sqlite error: {e}"),
            Error::Value(e) => write!(f, "value encoding error: {e}"),
            Error::Crypto(e) => write!(f, "crypto error: {e}"),
            Error::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            Error::NotFound => write!(f, "node not found"),
            Error::RejectedConfigKey(k) => write!(f, "config key not in whitelist: {k}"),
            Error::NoOpenBlob(id) => write!(f, "no open blob handle for node {id}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Sqlite(e)
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
