use std::collections::HashSet;
use std::net::IpAddr;

use http::HeaderMap;
use http::header::{self, HeaderName, HeaderValue};

const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Headers sent upstream: hop-by-hop removed, `Host` pointed at the upstream
/// and the client's view recorded in `X-Forwarded-*`.
pub(crate) fn upstream_request_headers(
    headers: &HeaderMap,
    upstream: &str,
    original_host: &str,
    client_ip: IpAddr,
) -> HeaderMap {
    let mut rewritten = strip_hop_by_hop(headers);

    if let Ok(host) = HeaderValue::from_str(upstream) {
        rewritten.insert(header::HOST, host);
    }
    if let Ok(value) = HeaderValue::from_str(original_host) {
        rewritten.append(X_FORWARDED_HOST, value);
    }
    rewritten.append(X_FORWARDED_PROTO, HeaderValue::from_static("https"));

    let forwarded_for = match rewritten
        .get(&X_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
    {
        Some(prior) if !prior.trim().is_empty() => format!("{prior}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        rewritten.insert(X_FORWARDED_FOR, value);
    }
    rewritten
}

pub(crate) fn downstream_response_headers(headers: &HeaderMap) -> HeaderMap {
    strip_hop_by_hop(headers)
}

fn strip_hop_by_hop(headers: &HeaderMap) -> HeaderMap {
    let blocked = blocked_header_names(headers);

    let mut rewritten = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if blocked.contains(name) {
            continue;
        }
        rewritten.append(name.clone(), value.clone());
    }
    rewritten
}

fn blocked_header_names(headers: &HeaderMap) -> HashSet<HeaderName> {
    let mut blocked = HashSet::with_capacity(HOP_BY_HOP_HEADERS.len() + 4);
    for name in HOP_BY_HOP_HEADERS {
        blocked.insert(HeaderName::from_static(name));
    }

    for token in connection_tokens(headers) {
        if let Ok(name) = HeaderName::from_bytes(token.as_bytes()) {
            blocked.insert(name);
        }
    }
    blocked
}

fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    let mut tokens = Vec::new();
    for value in headers.get_all(header::CONNECTION) {
        let Ok(raw) = value.to_str() else {
            continue;
        };
        for token in raw.split(',') {
            let trimmed = token.trim();
            if !trimmed.is_empty() {
                tokens.push(trimmed.to_ascii_lowercase());
            }
        }
    }
    tokens
}
