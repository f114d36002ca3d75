//! SNI-based certificate selection for TLS
//!
//! Each handshake picks the leaf whose domain equals the client's SNI name.
//! Handshakes without SNI, or naming a domain with no certificate, are refused.

use super::CertStore;
use rustls::ServerConfig;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use std::sync::Arc;

/// Certificate resolver backed by the live [`CertStore`] map
pub struct SniResolver {
    store: Arc<CertStore>,
}

impl SniResolver {
    pub fn new(store: Arc<CertStore>) -> Self {
        Self { store }
    }
}

impl std::fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SniResolver").finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let Some(sni_hostname) = client_hello.server_name() else {
            tracing::warn!("No SNI hostname in TLS handshake");
            return None;
        };

        match self.store.get(sni_hostname) {
            Some(key) => {
                tracing::debug!(hostname = %sni_hostname, "SNI certificate lookup");
                Some(key)
            }
            None => {
                tracing::warn!(hostname = %sni_hostname, "No certificate found for hostname");
                None
            }
        }
    }
}

/// Build the listener's rustls config around an [`SniResolver`].
///
/// Only HTTP/1.1 is offered via ALPN.
pub fn server_config(store: Arc<CertStore>) -> Result<Arc<ServerConfig>, rustls::Error> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(SniResolver::new(store)));
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}
