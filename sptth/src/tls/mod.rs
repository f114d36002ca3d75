//! Local certificate authority, leaf certificate store and SNI selection.
//!
//! Startup flow:
//! 1. [`CaStore::load_or_generate`] loads `rootCA.pem` / `rootCA-key.pem` or
//!    creates them; a freshly created root is handed to the platform
//!    [`TrustInstaller`].
//! 2. [`CertStore::ensure_all`] reuses or reissues one leaf per proxied domain.
//! 3. [`server_config`] wires the store into rustls so each handshake picks the
//!    leaf matching its SNI name.

mod ca;
mod sni;
mod store;
mod trust;

pub use ca::{CaError, CaOrigin, CaStore, Certificate, LocalCA, ROOT_CERT_FILE, ROOT_KEY_FILE};
pub use sni::{SniResolver, server_config};
pub use store::{CertError, CertStore, LeafOutcome, RenewalPolicy, run_renewal};
pub use trust::{TrustError, TrustInstaller, platform_installer};
