//! TOML-backed configuration for the bootstrap CLI: relay address,
//! storage directory, TLS verification mode, and the heartbeat/reconnect
//! timing overrides. Library crates never read this file directly — the
//! CLI parses it and passes plain fields into [`shroud::client::ClientConfig`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use shroud::client::TlsVerification;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Parse(toml::de::Error),
    UnknownTlsMode(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "could not read config file: {e}"),
            Error::Parse(e) => write!(f, "could not parse config file: {e}"),
            Error::UnknownTlsMode(m) => write!(f, "unknown tls_verification mode: {m:?} (expected platform, pinned, or insecure-anonymous)"),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Parse(e)
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    shroud::client::DEFAULT_PORT
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_tls_mode() -> String {
    "platform".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    shroud::client::HEARTBEAT_INTERVAL.as_millis() as u64
}

fn default_heartbeat_timeout_ms() -> u64 {
    shroud::client::HEARTBEAT_TIMEOUT.as_millis() as u64
}

fn default_reconnect_interval_ms() -> u64 {
    shroud::client::RECONNECT_INTERVAL.as_millis() as u64
}

/// The on-disk shape of `shroud.toml`. All fields are optional; any key
/// left unset falls back to the library's built-in defaults.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// One of `platform`, `pinned`, `insecure-anonymous`. `pinned`
    /// requires `tls_pinned_cert_path` to also be set.
    #[serde(default = "default_tls_mode")]
    pub tls_verification: String,
    pub tls_pinned_cert_path: Option<PathBuf>,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
}

impl Default for FileConfig {
    fn default() -> Self {
        FileConfig {
            host: default_host(),
            port: default_port(),
            storage_dir: default_storage_dir(),
            tls_verification: default_tls_mode(),
            tls_pinned_cert_path: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
        }
    }
}

/// A parsed, ready-to-use configuration.
pub struct Config {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub tls_verification: TlsVerification,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl Config {
    /// Loads `path` if it exists; otherwise returns the all-defaults
    /// configuration (no `shroud.toml` is required to run the CLI).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = if path.exists() {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text)?
        } else {
            FileConfig::default()
        };
        Self::from_file(file)
    }

    fn from_file(file: FileConfig) -> Result<Self, Error> {
        let tls_verification = match file.tls_verification.as_str() {
            "platform" => TlsVerification::Platform,
            "insecure-anonymous" => TlsVerification::InsecureAnonymous,
            "pinned" => {
                let cert_path = file.tls_pinned_cert_path.ok_or_else(|| Error::UnknownTlsMode("pinned (missing tls_pinned_cert_path)".to_string()))?;
                let der = std::fs::read(cert_path)?;
                TlsVerification::Pinned(der)
            }
            other => return Err(Error::UnknownTlsMode(other.to_string())),
        };
        Ok(Config {
            host: file.host,
            port: file.port,
            storage_dir: file.storage_dir,
            tls_verification,
            heartbeat_interval: Duration::from_millis(file.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(file.heartbeat_timeout_ms),
            reconnect_interval: Duration::from_millis(file.reconnect_interval_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_library_constants_when_file_is_absent() {
        let config = Config::load("does-not-exist-shroud.toml").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, shroud::client::DEFAULT_PORT);
        assert_eq!(config.heartbeat_interval, shroud::client::HEARTBEAT_INTERVAL);
        assert_eq!(config.heartbeat_timeout, shroud::client::HEARTBEAT_TIMEOUT);
        assert_eq!(config.reconnect_interval, shroud::client::RECONNECT_INTERVAL);
        assert!(matches!(config.tls_verification, TlsVerification::Platform));
    }

    #[test]
    fn parses_a_minimal_file() {
        let file: FileConfig = toml::from_str(
            r#"
            host = "relay.example.org"
            port = 5557
            tls_verification = "insecure-anonymous"
            "#,
        )
        .unwrap();
        let config = Config::from_file(file).unwrap();
        assert_eq!(config.host, "relay.example.org");
        assert!(matches!(config.tls_verification, TlsVerification::InsecureAnonymous));
    }

    #[test]
    fn rejects_unknown_tls_mode() {
        let file: FileConfig = toml::from_str(r#"tls_verification = "nonsense""#).unwrap();
        assert!(matches!(Config::from_file(file), Err(Error::UnknownTlsMode(_))));
    }

    #[test]
    fn pinned_mode_without_cert_path_is_rejected() {
        let file: FileConfig = toml::from_str(r#"tls_verification = "pinned""#).unwrap();
        assert!(matches!(Config::from_file(file), Err(Error::UnknownTlsMode(_))));
    }
}
