//! Proxy routing: map the request's domain to a plaintext upstream.
//!
//! Pure logic with no hyper types so it stays easy to test.

use std::collections::HashMap;

use crate::config::ProxyConfig;
use crate::domain::{normalize_domain, normalize_host};

#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    upstreams: HashMap<String, String>,
}

/// Outcome of routing one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Forward { domain: String, upstream: String },
    /// Request carried no usable host information
    MissingHost,
    /// Host header names a different domain than the TLS handshake did
    HostMismatch { sni: String, host: String },
    NoRoute { domain: String },
}

impl RouteTable {
    pub fn from_config(proxies: &[ProxyConfig]) -> Self {
        let upstreams = proxies
            .iter()
            .map(|p| (normalize_domain(&p.domain), p.upstream.clone()))
            .collect();
        Self { upstreams }
    }

    /// Decide where a request goes.
    ///
    /// `sni` is the name the connection was established for; `host` is the
    /// request's Host header or absolute-URI authority. When both are present
    /// they must name the same domain.
    pub fn select(&self, sni: Option<&str>, host: Option<&str>) -> RouteDecision {
        let host = host.map(normalize_host).filter(|h| !h.is_empty());
        let sni = sni.map(normalize_domain).filter(|s| !s.is_empty());

        let domain = match (sni, host) {
            (Some(sni), Some(host)) if sni != host => {
                return RouteDecision::HostMismatch { sni, host };
            }
            (_, Some(host)) => host,
            (Some(sni), None) => sni,
            (None, None) => return RouteDecision::MissingHost,
        };

        match self.upstreams.get(&domain) {
            Some(upstream) => RouteDecision::Forward {
                upstream: upstream.clone(),
                domain,
            },
            None => RouteDecision::NoRoute { domain },
        }
    }
}
