use std::net::SocketAddr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::tls::{CaError, CertError, TrustError};

/// Fatal startup failures. Anything here aborts before traffic is served.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("root CA: {0}")]
    Ca(#[from] CaError),

    #[error("installing root CA into the system trust store: {0}")]
    Trust(#[from] TrustError),

    #[error("leaf certificates: {0}")]
    Cert(#[from] CertError),

    #[error("TLS setup: {0}")]
    Tls(#[from] rustls::Error),

    #[error("failed to bind {what} on {addr}: {source}")]
    Bind {
        what: &'static str,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
