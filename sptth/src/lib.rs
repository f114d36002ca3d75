//! sptth: local DNS overrides, a private CA and a TLS-terminating reverse
//! proxy, so production hostnames can be served from development upstreams.

pub mod config;
pub mod dns;
pub mod domain;
pub mod error;
pub mod logging;
pub mod paths;
pub mod proxy;
pub mod server;
pub mod tls;

pub use error::{Error, Result};
