//! Configuration loading and validation.
//!
//! `config.toml` is read once at startup and turned into an immutable
//! [`AppConfig`] snapshot. Each component receives its own slice of that
//! snapshot; nothing reads configuration from ambient state later.
//!
//! Validation happens before any socket is opened or file is written:
//! - domains are normalized and must be unique per section
//! - every `[[proxy]]` shares one listen address
//! - proxy upstreams are bare `host:port`
//! - every proxied domain also has a `[[record]]` so DNS points it at the proxy

mod error;
mod sptth_toml;

pub use error::{ConfigError, Result};
pub use sptth_toml::{DnsSection, LimitsSection, ProxyEntry, RecordEntry, SptthToml, TlsSection};

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use http::uri::Authority;

use crate::domain::{normalize_domain, validate_domain};
use crate::paths;

/// hyper refuses read buffers smaller than this.
const MIN_HEADER_BYTES: usize = 8192;

/// Ceiling for `limits.max_connections` and `dns.max_inflight_queries`
pub const MAX_CONCURRENCY: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warn" | "warning" => Some(Self::Warn),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            "trace" => Some(Self::Trace),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DnsConfig {
    pub listen: SocketAddr,
    /// Tried in order for every forwarded query
    pub upstreams: Vec<SocketAddr>,
    pub ttl_seconds: u32,
    /// Deadline for a single upstream attempt
    pub upstream_timeout: Duration,
    pub max_inflight_queries: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordConfig {
    pub domain: String,
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
    pub ttl_seconds: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub ca_common_name: String,
    pub ca_dir: PathBuf,
    pub cert_dir: PathBuf,
    pub valid_days: u32,
    pub renew_before_days: u32,
    /// `None` disables runtime renewal; certificates are then only checked at startup.
    pub renew_check_interval: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub domain: String,
    pub listen: SocketAddr,
    /// Bare `host:port` authority
    pub upstream: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LimitsConfig {
    pub max_connections: usize,
    pub max_header_bytes: usize,
    pub max_request_body_bytes: usize,
    pub max_response_body_bytes: usize,
    pub handshake_timeout: Duration,
    pub header_read_timeout: Duration,
    pub upstream_connect_timeout: Duration,
    pub upstream_response_timeout: Duration,
    pub body_idle_timeout: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        limits_from_section(&LimitsSection::default())
    }
}

/// Validated, immutable configuration snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub log_level: LogLevel,
    pub dns: DnsConfig,
    pub records: Vec<RecordConfig>,
    /// `None` when `[tls]` is absent or disabled
    pub tls: Option<TlsConfig>,
    pub proxies: Vec<ProxyConfig>,
    pub limits: LimitsConfig,
}

impl AppConfig {
    /// Read, parse and validate a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml(SptthToml::load(path)?)
    }

    /// Parse and validate a config document
    pub fn parse(content: &str) -> Result<Self> {
        Self::from_toml(SptthToml::parse(content)?)
    }

    pub fn from_toml(raw: SptthToml) -> Result<Self> {
        let dns_section = raw.dns.ok_or(ConfigError::MissingSection("dns"))?;
        let log_level = match dns_section.log_level.as_deref() {
            None => LogLevel::default(),
            Some(value) => LogLevel::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                field: "dns.log_level",
                value: value.to_string(),
                reason: "expected error, warn, info, debug or trace".to_string(),
            })?,
        };
        let dns = dns_from_section(&dns_section)?;
        let records = records_from_entries(&raw.records, dns.ttl_seconds)?;
        let tls = match raw.tls {
            Some(section) if section.enabled => Some(tls_from_section(&section)?),
            _ => None,
        };
        let proxies = proxies_from_entries(&raw.proxies)?;
        let limits = validate_limits(&raw.limits)?;

        if !proxies.is_empty() && tls.is_none() {
            return Err(ConfigError::ProxyRequiresTls);
        }

        let record_domains: HashSet<&str> = records.iter().map(|r| r.domain.as_str()).collect();
        for proxy in &proxies {
            if !record_domains.contains(proxy.domain.as_str()) {
                return Err(ConfigError::ProxyWithoutRecord(proxy.domain.clone()));
            }
        }

        Ok(Self {
            log_level,
            dns,
            records,
            tls,
            proxies,
            limits,
        })
    }

    /// Shared listen address of all proxy routes, if any are configured
    pub fn proxy_listen(&self) -> Option<SocketAddr> {
        self.proxies.first().map(|p| p.listen)
    }
}

fn dns_from_section(section: &DnsSection) -> Result<DnsConfig> {
    let listen = parse_socket_addr("dns.listen", &section.listen)?;

    if section.upstream.is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "dns.upstream",
            value: "[]".to_string(),
            reason: "at least one upstream dns server is required".to_string(),
        });
    }
    let upstreams = section
        .upstream
        .iter()
        .map(|u| parse_socket_addr("dns.upstream", u))
        .collect::<Result<Vec<_>>>()?;

    if section.upstream_timeout_ms == 0 {
        return Err(non_zero("dns.upstream_timeout_ms"));
    }
    if section.max_inflight_queries == 0 {
        return Err(non_zero("dns.max_inflight_queries"));
    }
    check_concurrency("dns.max_inflight_queries", section.max_inflight_queries)?;

    Ok(DnsConfig {
        listen,
        upstreams,
        ttl_seconds: section.ttl_seconds,
        upstream_timeout: Duration::from_millis(section.upstream_timeout_ms),
        max_inflight_queries: section.max_inflight_queries,
    })
}

fn records_from_entries(entries: &[RecordEntry], default_ttl: u32) -> Result<Vec<RecordConfig>> {
    let mut seen = HashSet::new();
    let mut records = Vec::with_capacity(entries.len());

    for entry in entries {
        let domain = checked_domain("record.domain", &entry.domain)?;
        if !seen.insert(domain.clone()) {
            return Err(ConfigError::DuplicateRecordDomain(domain));
        }
        if entry.a.is_empty() && entry.aaaa.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "record",
                value: domain,
                reason: "record requires A and/or AAAA values".to_string(),
            });
        }

        let mut ipv4 = Vec::with_capacity(entry.a.len());
        for value in &entry.a {
            match value.trim().parse::<IpAddr>() {
                Ok(IpAddr::V4(v4)) => ipv4.push(v4),
                Ok(IpAddr::V6(_)) => return Err(wrong_family("record.A", value, "A must be IPv4")),
                Err(_) => return Err(wrong_family("record.A", value, "not an IP address")),
            }
        }

        let mut ipv6 = Vec::with_capacity(entry.aaaa.len());
        for value in &entry.aaaa {
            match value.trim().parse::<IpAddr>() {
                Ok(IpAddr::V6(v6)) => ipv6.push(v6),
                Ok(IpAddr::V4(_)) => {
                    return Err(wrong_family("record.AAAA", value, "AAAA must be IPv6"));
                }
                Err(_) => return Err(wrong_family("record.AAAA", value, "not an IP address")),
            }
        }

        records.push(RecordConfig {
            domain,
            ipv4,
            ipv6,
            ttl_seconds: entry.ttl_seconds.unwrap_or(default_ttl),
        });
    }

    Ok(records)
}

fn tls_from_section(section: &TlsSection) -> Result<TlsConfig> {
    if section.valid_days == 0 {
        return Err(non_zero("tls.valid_days"));
    }
    if section.renew_before_days == 0 {
        return Err(non_zero("tls.renew_before_days"));
    }
    if section.renew_before_days >= section.valid_days {
        return Err(ConfigError::InvalidValue {
            field: "tls.renew_before_days",
            value: section.renew_before_days.to_string(),
            reason: format!("must be less than tls.valid_days ({})", section.valid_days),
        });
    }
    if section.ca_common_name.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "tls.ca_common_name",
            value: section.ca_common_name.clone(),
            reason: "must not be empty".to_string(),
        });
    }

    let ca_dir = resolve_dir("tls.ca_dir", section.ca_dir.as_deref(), paths::default_ca_dir)?;
    let cert_dir = resolve_dir(
        "tls.cert_dir",
        section.cert_dir.as_deref(),
        paths::default_cert_dir,
    )?;

    let renew_check_interval = match section.renew_check_interval_hours {
        0 => None,
        hours => Some(Duration::from_secs(hours.saturating_mul(60 * 60))),
    };

    Ok(TlsConfig {
        ca_common_name: section.ca_common_name.trim().to_string(),
        ca_dir,
        cert_dir,
        valid_days: section.valid_days,
        renew_before_days: section.renew_before_days,
        renew_check_interval,
    })
}

fn proxies_from_entries(entries: &[ProxyEntry]) -> Result<Vec<ProxyConfig>> {
    let mut seen = HashSet::new();
    let mut proxies: Vec<ProxyConfig> = Vec::with_capacity(entries.len());

    for entry in entries {
        let domain = checked_domain("proxy.domain", &entry.domain)?;
        if !seen.insert(domain.clone()) {
            return Err(ConfigError::DuplicateProxyDomain(domain));
        }

        let listen = parse_socket_addr("proxy.listen", &entry.listen)?;
        if let Some(first) = proxies.first()
            && first.listen != listen
        {
            return Err(ConfigError::InconsistentProxyListen {
                domain,
                listen,
                expected: first.listen,
            });
        }

        let upstream = validate_upstream(&domain, &entry.upstream)?;
        proxies.push(ProxyConfig {
            domain,
            listen,
            upstream,
        });
    }

    Ok(proxies)
}

/// Upstreams are plaintext HTTP targets written as `host:port`.
fn validate_upstream(domain: &str, value: &str) -> Result<String> {
    let invalid = |reason| ConfigError::InvalidUpstream {
        domain: domain.to_string(),
        value: value.to_string(),
        reason,
    };

    let trimmed = value.trim();
    if trimmed.contains("://") {
        return Err(invalid("must be host:port with no scheme"));
    }
    let authority = trimmed
        .parse::<Authority>()
        .map_err(|_| invalid("is not a valid host:port"))?;
    if authority.as_str().contains('@') {
        return Err(invalid("must not include credentials"));
    }
    if authority.host().is_empty() {
        return Err(invalid("must include a host"));
    }
    if authority.port_u16().is_none() {
        return Err(invalid("must include port"));
    }
    Ok(authority.as_str().to_string())
}

fn validate_limits(section: &LimitsSection) -> Result<LimitsConfig> {
    let counts = [
        ("limits.max_connections", section.max_connections),
        ("limits.max_request_body_bytes", section.max_request_body_bytes),
        ("limits.max_response_body_bytes", section.max_response_body_bytes),
    ];
    for (field, value) in counts {
        if value == 0 {
            return Err(non_zero(field));
        }
    }

    check_concurrency("limits.max_connections", section.max_connections)?;

    let timeouts = [
        ("limits.handshake_timeout_secs", section.handshake_timeout_secs),
        ("limits.header_read_timeout_secs", section.header_read_timeout_secs),
        ("limits.upstream_connect_timeout_secs", section.upstream_connect_timeout_secs),
        ("limits.upstream_response_timeout_secs", section.upstream_response_timeout_secs),
        ("limits.body_idle_timeout_secs", section.body_idle_timeout_secs),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(non_zero(field));
        }
    }

    if section.max_header_bytes < MIN_HEADER_BYTES {
        return Err(ConfigError::InvalidValue {
            field: "limits.max_header_bytes",
            value: section.max_header_bytes.to_string(),
            reason: format!("must be at least {MIN_HEADER_BYTES}"),
        });
    }

    Ok(limits_from_section(section))
}

fn limits_from_section(section: &LimitsSection) -> LimitsConfig {
    LimitsConfig {
        max_connections: section.max_connections,
        max_header_bytes: section.max_header_bytes,
        max_request_body_bytes: section.max_request_body_bytes,
        max_response_body_bytes: section.max_response_body_bytes,
        handshake_timeout: Duration::from_secs(section.handshake_timeout_secs),
        header_read_timeout: Duration::from_secs(section.header_read_timeout_secs),
        upstream_connect_timeout: Duration::from_secs(section.upstream_connect_timeout_secs),
        upstream_response_timeout: Duration::from_secs(section.upstream_response_timeout_secs),
        body_idle_timeout: Duration::from_secs(section.body_idle_timeout_secs),
    }
}

fn checked_domain(field: &'static str, value: &str) -> Result<String> {
    let domain = normalize_domain(value);
    validate_domain(&domain).map_err(|reason| ConfigError::InvalidDomain {
        field,
        value: value.to_string(),
        reason,
    })?;
    Ok(domain)
}

fn parse_socket_addr(field: &'static str, value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidValue {
            field,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

fn resolve_dir(
    field: &'static str,
    configured: Option<&str>,
    default: fn() -> std::io::Result<PathBuf>,
) -> Result<PathBuf> {
    let resolved = match configured.map(str::trim) {
        Some(value) if !value.is_empty() => paths::expand_home(value),
        _ => default(),
    };
    resolved.map_err(|e| ConfigError::InvalidValue {
        field,
        value: configured.unwrap_or("<default>").to_string(),
        reason: e.to_string(),
    })
}

fn check_concurrency(field: &'static str, value: usize) -> Result<()> {
    if value > MAX_CONCURRENCY {
        return Err(ConfigError::InvalidValue {
            field,
            value: value.to_string(),
            reason: format!("must be at most {MAX_CONCURRENCY}"),
        });
    }
    Ok(())
}

fn non_zero(field: &'static str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: "0".to_string(),
        reason: "must be greater than zero".to_string(),
    }
}

fn wrong_family(field: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[dns]
listen = "127.0.0.1:53"
upstream = ["1.1.1.1:53", "8.8.8.8:53"]
"#;

    const TLS: &str = r#"
[tls]
ca_dir = "/tmp/sptth-test/ca"
cert_dir = "/tmp/sptth-test/certs"
"#;

    fn parse(extra: &str) -> Result<AppConfig> {
        AppConfig::parse(&format!("{BASE}{extra}"))
    }

    #[test]
    fn parses_full_configuration() {
        let cfg = parse(&format!(
            r#"
[[record]]
domain = "Example.COM."
A = ["127.0.0.1"]
AAAA = ["::1"]

{TLS}

[[proxy]]
domain = "example.com"
listen = "127.0.0.1:443"
upstream = "localhost:3000"
"#
        ))
        .unwrap();

        assert_eq!(cfg.dns.listen, "127.0.0.1:53".parse().unwrap());
        assert_eq!(cfg.dns.upstreams.len(), 2);
        assert_eq!(cfg.dns.upstream_timeout, Duration::from_secs(2));
        assert_eq!(cfg.log_level, LogLevel::Info);
        assert_eq!(cfg.records[0].domain, "example.com");
        assert_eq!(cfg.records[0].ttl_seconds, 30);
        assert_eq!(cfg.records[0].ipv4, vec![Ipv4Addr::LOCALHOST]);
        assert_eq!(cfg.records[0].ipv6, vec![Ipv6Addr::LOCALHOST]);
        assert_eq!(cfg.proxies[0].upstream, "localhost:3000");
        assert_eq!(cfg.proxy_listen(), Some("127.0.0.1:443".parse().unwrap()));

        let tls = cfg.tls.unwrap();
        assert_eq!(tls.ca_dir, PathBuf::from("/tmp/sptth-test/ca"));
        assert_eq!(tls.renew_check_interval, Some(Duration::from_secs(12 * 3600)));
    }

    #[test]
    fn allows_configuration_without_records_or_proxies() {
        let cfg = parse("").unwrap();
        assert!(cfg.records.is_empty());
        assert!(cfg.proxies.is_empty());
        assert!(cfg.tls.is_none());
        assert_eq!(cfg.proxy_listen(), None);
    }

    #[test]
    fn record_ttl_overrides_dns_default() {
        let cfg = parse(
            r#"
[[record]]
domain = "a.test"
A = ["127.0.0.1"]
ttl_seconds = 5

[[record]]
domain = "b.test"
A = ["127.0.0.2"]
"#,
        )
        .unwrap();
        assert_eq!(cfg.records[0].ttl_seconds, 5);
        assert_eq!(cfg.records[1].ttl_seconds, 30);
    }

    #[test]
    fn rejects_missing_dns_section() {
        let err = AppConfig::parse("").unwrap_err();
        assert!(matches!(err, ConfigError::MissingSection("dns")));
    }

    #[test]
    fn rejects_empty_upstream_list() {
        let err = AppConfig::parse(
            r#"
[dns]
listen = "127.0.0.1:53"
upstream = []
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dns.upstream"));
    }

    #[test]
    fn rejects_unparseable_listen_address() {
        let err = AppConfig::parse(
            r#"
[dns]
listen = "localhost"
upstream = ["1.1.1.1:53"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dns.listen"));
    }

    #[test]
    fn rejects_invalid_log_level() {
        let err = AppConfig::parse(
            r#"
[dns]
listen = "127.0.0.1:53"
upstream = ["1.1.1.1:53"]
log_level = "loud"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("dns.log_level"));
    }

    #[test]
    fn rejects_duplicate_record_after_normalization() {
        let err = parse(
            r#"
[[record]]
domain = "example.com"
A = ["127.0.0.1"]

[[record]]
domain = "EXAMPLE.com."
A = ["127.0.0.2"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateRecordDomain(d) if d == "example.com"));
    }

    #[test]
    fn rejects_record_without_addresses() {
        let err = parse(
            r#"
[[record]]
domain = "example.com"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("A and/or AAAA"));
    }

    #[test]
    fn rejects_address_family_mismatch() {
        let err = parse(
            r#"
[[record]]
domain = "example.com"
A = ["::1"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("A must be IPv4"));

        let err = parse(
            r#"
[[record]]
domain = "example.com"
AAAA = ["127.0.0.1"]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("AAAA must be IPv6"));
    }

    #[test]
    fn rejects_path_like_domain() {
        let err = parse(
            r#"
[[record]]
domain = "../../etc"
A = ["127.0.0.1"]
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDomain { field: "record.domain", .. }));
    }

    #[test]
    fn rejects_duplicate_proxy_domain() {
        let err = parse(&format!(
            r#"
[[record]]
domain = "example.com"
A = ["127.0.0.1"]
{TLS}
[[proxy]]
domain = "example.com"
listen = "127.0.0.1:443"
upstream = "localhost:3000"

[[proxy]]
domain = "Example.com"
listen = "127.0.0.1:443"
upstream = "localhost:3001"
"#
        ))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate proxy.domain"));
    }

    #[test]
    fn rejects_differing_proxy_listen() {
        let err = parse(&format!(
            r#"
[[record]]
domain = "a.test"
A = ["127.0.0.1"]

[[record]]
domain = "b.test"
A = ["127.0.0.1"]
{TLS}
[[proxy]]
domain = "a.test"
listen = "127.0.0.1:443"
upstream = "localhost:3000"

[[proxy]]
domain = "b.test"
listen = "127.0.0.1:8443"
upstream = "localhost:3001"
"#
        ))
        .unwrap_err();
        assert!(err.to_string().contains("invalid proxy.listen"));
    }

    fn proxy_with_upstream(upstream: &str) -> Result<AppConfig> {
        parse(&format!(
            r#"
[[record]]
domain = "example.com"
A = ["127.0.0.1"]
{TLS}
[[proxy]]
domain = "example.com"
listen = "127.0.0.1:443"
upstream = "{upstream}"
"#
        ))
    }

    #[test]
    fn rejects_upstream_with_scheme() {
        let err = proxy_with_upstream("http://localhost:3000").unwrap_err();
        assert!(err.to_string().contains("no scheme"));
    }

    #[test]
    fn rejects_upstream_without_port() {
        let err = proxy_with_upstream("localhost").unwrap_err();
        assert!(err.to_string().contains("must include port"));
    }

    #[test]
    fn rejects_upstream_with_path() {
        assert!(proxy_with_upstream("localhost:3000/api").is_err());
    }

    #[test]
    fn accepts_ipv6_upstream() {
        let cfg = proxy_with_upstream("[::1]:3000").unwrap();
        assert_eq!(cfg.proxies[0].upstream, "[::1]:3000");
    }

    #[test]
    fn rejects_proxy_without_matching_record() {
        let err = parse(&format!(
            r#"
[[record]]
domain = "other.test"
A = ["127.0.0.1"]
{TLS}
[[proxy]]
domain = "example.com"
listen = "127.0.0.1:443"
upstream = "localhost:3000"
"#
        ))
        .unwrap_err();
        assert!(matches!(err, ConfigError::ProxyWithoutRecord(d) if d == "example.com"));
    }

    #[test]
    fn rejects_proxy_without_tls() {
        let err = parse(
            r#"
[[record]]
domain = "example.com"
A = ["127.0.0.1"]

[tls]
enabled = false

[[proxy]]
domain = "example.com"
listen = "127.0.0.1:443"
upstream = "localhost:3000"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ProxyRequiresTls));
    }

    #[test]
    fn rejects_renewal_threshold_not_below_validity() {
        let err = parse(
            r#"
[tls]
ca_dir = "/tmp/ca"
cert_dir = "/tmp/certs"
valid_days = 30
renew_before_days = 30
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("tls.renew_before_days"));
    }

    #[test]
    fn zero_renew_interval_disables_runtime_renewal() {
        let cfg = parse(
            r#"
[tls]
ca_dir = "/tmp/ca"
cert_dir = "/tmp/certs"
renew_check_interval_hours = 0
"#,
        )
        .unwrap();
        assert_eq!(cfg.tls.unwrap().renew_check_interval, None);
    }

    #[test]
    fn rejects_small_header_limit() {
        let err = parse(
            r#"
[limits]
max_header_bytes = 1024
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("limits.max_header_bytes"));
    }

    #[test]
    fn rejects_concurrency_limits_above_ceiling() {
        let err = parse(&format!(
            r#"
[limits]
max_connections = {}
"#,
            MAX_CONCURRENCY + 1
        ))
        .unwrap_err();
        assert!(err.to_string().contains("limits.max_connections"));

        let err = AppConfig::parse(&format!(
            r#"
[dns]
listen = "127.0.0.1:53"
upstream = ["1.1.1.1:53"]
max_inflight_queries = {}
"#,
            MAX_CONCURRENCY + 1
        ))
        .unwrap_err();
        assert!(err.to_string().contains("dns.max_inflight_queries"));

        let cfg = parse(&format!(
            r#"
[limits]
max_connections = {MAX_CONCURRENCY}
"#
        ))
        .unwrap();
        assert_eq!(cfg.limits.max_connections, MAX_CONCURRENCY);
    }

    #[test]
    fn rejects_zero_timeouts() {
        let err = parse(
            r#"
[limits]
handshake_timeout_secs = 0
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("limits.handshake_timeout_secs"));
    }
}
