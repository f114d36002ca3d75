use serde::Deserialize;
use std::fs;
use std::path::Path;

use super::error::{ConfigError, Result};

/// Raw configuration document as written by the user.
///
/// Values are kept as strings here; [`super::AppConfig::from_toml`] turns
/// them into typed, validated settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SptthToml {
    /// [dns] section - listener and upstream resolvers
    pub dns: Option<DnsSection>,

    /// [[record]] entries - local address overrides
    #[serde(default, rename = "record")]
    pub records: Vec<RecordEntry>,

    /// [tls] section - local CA and leaf certificates
    pub tls: Option<TlsSection>,

    /// [[proxy]] entries - HTTPS routes
    #[serde(default, rename = "proxy")]
    pub proxies: Vec<ProxyEntry>,

    /// [limits] section - proxy resource bounds
    #[serde(default)]
    pub limits: LimitsSection,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DnsSection {
    pub listen: String,

    #[serde(default)]
    pub upstream: Vec<String>,

    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u32,

    pub log_level: Option<String>,

    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    #[serde(default = "default_max_inflight_queries")]
    pub max_inflight_queries: usize,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RecordEntry {
    pub domain: String,

    #[serde(default, rename = "A")]
    pub a: Vec<String>,

    #[serde(default, rename = "AAAA")]
    pub aaaa: Vec<String>,

    /// Falls back to `dns.ttl_seconds`
    pub ttl_seconds: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TlsSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_ca_common_name")]
    pub ca_common_name: String,

    #[serde(default = "default_valid_days")]
    pub valid_days: u32,

    #[serde(default = "default_renew_before_days")]
    pub renew_before_days: u32,

    pub ca_dir: Option<String>,

    pub cert_dir: Option<String>,

    /// 0 disables the runtime renewal task
    #[serde(default = "default_renew_check_interval_hours")]
    pub renew_check_interval_hours: u64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProxyEntry {
    pub domain: String,
    pub listen: String,
    pub upstream: String,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,

    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,

    #[serde(default = "default_max_response_body_bytes")]
    pub max_response_body_bytes: usize,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_header_read_timeout_secs")]
    pub header_read_timeout_secs: u64,

    #[serde(default = "default_upstream_connect_timeout_secs")]
    pub upstream_connect_timeout_secs: u64,

    #[serde(default = "default_upstream_response_timeout_secs")]
    pub upstream_response_timeout_secs: u64,

    #[serde(default = "default_body_idle_timeout_secs")]
    pub body_idle_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_ttl_seconds() -> u32 {
    30
}

fn default_upstream_timeout_ms() -> u64 {
    2000
}

fn default_max_inflight_queries() -> usize {
    512
}

fn default_ca_common_name() -> String {
    "sptth local CA".to_string()
}

fn default_valid_days() -> u32 {
    90
}

fn default_renew_before_days() -> u32 {
    30
}

fn default_renew_check_interval_hours() -> u64 {
    12
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_header_bytes() -> usize {
    64 * 1024
}

fn default_max_request_body_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_response_body_bytes() -> usize {
    256 * 1024 * 1024
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_header_read_timeout_secs() -> u64 {
    30
}

fn default_upstream_connect_timeout_secs() -> u64 {
    5
}

fn default_upstream_response_timeout_secs() -> u64 {
    60
}

fn default_body_idle_timeout_secs() -> u64 {
    60
}

impl Default for TlsSection {
    fn default() -> Self {
        Self {
            enabled: true,
            ca_common_name: default_ca_common_name(),
            valid_days: default_valid_days(),
            renew_before_days: default_renew_before_days(),
            ca_dir: None,
            cert_dir: None,
            renew_check_interval_hours: default_renew_check_interval_hours(),
        }
    }
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_header_bytes: default_max_header_bytes(),
            max_request_body_bytes: default_max_request_body_bytes(),
            max_response_body_bytes: default_max_response_body_bytes(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            header_read_timeout_secs: default_header_read_timeout_secs(),
            upstream_connect_timeout_secs: default_upstream_connect_timeout_secs(),
            upstream_response_timeout_secs: default_upstream_response_timeout_secs(),
            body_idle_timeout_secs: default_body_idle_timeout_secs(),
        }
    }
}

impl SptthToml {
    /// Load a config document from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        Self::parse(&content)
    }

    /// Parse a config document from a string
    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
