use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration errors
///
/// Every variant names the offending field so the startup log line is
/// actionable without opening the file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Missing required section [{0}]")]
    MissingSection(&'static str),

    #[error("Invalid {field}: '{value}' ({reason})")]
    InvalidValue {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid {field} '{value}': {reason}")]
    InvalidDomain {
        field: &'static str,
        value: String,
        reason: String,
    },

    #[error("duplicate record.domain: {0}")]
    DuplicateRecordDomain(String),

    #[error("duplicate proxy.domain: {0}")]
    DuplicateProxyDomain(String),

    #[error(
        "invalid proxy.listen for {domain}: {listen} (all proxy.listen must be identical, expected {expected})"
    )]
    InconsistentProxyListen {
        domain: String,
        listen: SocketAddr,
        expected: SocketAddr,
    },

    #[error("invalid proxy.upstream for {domain}: '{value}' {reason}")]
    InvalidUpstream {
        domain: String,
        value: String,
        reason: &'static str,
    },

    #[error("proxy.domain {0} has no [[record]] entry; DNS would not send it to the proxy")]
    ProxyWithoutRecord(String),

    #[error("[[proxy]] entries require [tls] with enabled = true")]
    ProxyRequiresTls,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
