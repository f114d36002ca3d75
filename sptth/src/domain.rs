//! Domain name handling shared by DNS overrides, certificates and routing.
//!
//! Every component keys its tables by the same normalized form:
//! - surrounding whitespace trimmed
//! - trailing dots removed (`Example.COM.` -> `example.com`)
//! - ASCII lowercase
//!
//! Normalized names are also used as certificate file stems, so validation
//! only admits DNS label characters.

const MAX_DOMAIN_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

/// Normalize a domain name for case-insensitive comparison.
pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

/// Normalize the host portion of an HTTP `Host` header or URI authority.
///
/// Strips an optional port, IPv6 brackets and trailing dots.
pub fn normalize_host(host: &str) -> String {
    let host = host.trim();
    let without_port = if let Some(rest) = host.strip_prefix('[') {
        rest.split_once(']').map(|(inner, _)| inner).unwrap_or(rest)
    } else {
        match host.rsplit_once(':') {
            Some((name, port))
                if !name.contains(':') && port.chars().all(|c| c.is_ascii_digit()) =>
            {
                name
            }
            _ => host,
        }
    };
    normalize_domain(without_port)
}

/// Check that an already-normalized domain is a usable DNS name.
///
/// Returns a human readable reason on failure.
pub fn validate_domain(domain: &str) -> Result<(), String> {
    if domain.is_empty() {
        return Err("domain is empty".to_string());
    }
    if domain.len() > MAX_DOMAIN_LEN {
        return Err(format!("domain exceeds {MAX_DOMAIN_LEN} characters"));
    }
    for label in domain.split('.') {
        if label.is_empty() {
            return Err("domain contains an empty label".to_string());
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(format!("label '{label}' exceeds {MAX_LABEL_LEN} characters"));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
        {
            return Err(format!("label '{label}' contains invalid characters"));
        }
        if label.starts_with('-') || label.ends_with('-') {
            return Err(format!("label '{label}' must not start or end with '-'"));
        }
    }
    Ok(())
}
