//! Leaf certificate store - issue, reuse and renew per-domain certificates

use parking_lot::RwLock;
use rustls::InconsistentKeys;
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use x509_parser::pem::parse_x509_pem;

use super::ca::{CaError, LocalCA};
use crate::config::TlsConfig;
use crate::paths;

const SECS_PER_DAY: i64 = 86_400;

/// Errors that can occur during leaf certificate management
#[derive(Debug, Error)]
pub enum CertError {
    #[error("Failed to issue certificate for {domain}: {source}")]
    Issue {
        domain: String,
        #[source]
        source: CaError,
    },

    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, std::io::Error),

    #[error("Failed to write private key for {domain}: {source}")]
    KeyWrite {
        domain: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse certificate: {0}")]
    ParseError(String),

    #[error("Failed to load key for {0}: {1}")]
    KeyLoad(String, String),
}

pub type Result<T> = std::result::Result<T, CertError>;

/// Leaf lifetime and how early to replace it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewalPolicy {
    pub valid_days: u32,
    pub renew_before_days: u32,
}

impl RenewalPolicy {
    pub fn from_config(config: &TlsConfig) -> Self {
        Self {
            valid_days: config.valid_days,
            renew_before_days: config.renew_before_days,
        }
    }

    /// A leaf is due once its remaining validity is at or below the threshold.
    pub fn needs_renewal(&self, not_after_unix: i64, now_unix: i64) -> bool {
        let remaining = not_after_unix.saturating_sub(now_unix);
        remaining <= i64::from(self.renew_before_days) * SECS_PER_DAY
    }
}

/// What [`CertStore::ensure_all`] did for one domain
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeafOutcome {
    Reused { days_remaining: i64 },
    Issued { reason: &'static str },
}

type CertMap = HashMap<String, Arc<CertifiedKey>>;

/// Per-domain leaf certificates on disk plus the in-memory map used for SNI.
///
/// The map is replaced wholesale after every refresh, so a handshake sees
/// either the previous set of keys or the new one, never a mix.
pub struct CertStore {
    dir: PathBuf,
    policy: RenewalPolicy,
    domains: Vec<String>,
    certs: RwLock<Arc<CertMap>>,
}

impl std::fmt::Debug for CertStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertStore")
            .field("dir", &self.dir)
            .field("policy", &self.policy)
            .field("domains", &self.domains)
            .finish_non_exhaustive()
    }
}

impl CertStore {
    pub fn new(dir: impl Into<PathBuf>, policy: RenewalPolicy, domains: Vec<String>) -> Self {
        Self {
            dir: dir.into(),
            policy,
            domains,
            certs: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn cert_path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{domain}.pem"))
    }

    pub fn key_path(&self, domain: &str) -> PathBuf {
        self.dir.join(format!("{domain}.key"))
    }

    /// Certificate and key presented for `server_name`
    pub fn get(&self, server_name: &str) -> Option<Arc<CertifiedKey>> {
        let name = crate::domain::normalize_domain(server_name);
        self.certs.read().get(&name).cloned()
    }

    /// Make sure every domain has a valid leaf signed by `ca`, then publish
    /// the resulting key set.
    ///
    /// Any failure aborts before the in-memory map changes.
    pub fn ensure_all(&self, ca: &LocalCA) -> Result<Vec<(String, LeafOutcome)>> {
        if !self.domains.is_empty() {
            paths::ensure_private_dir(&self.dir)
                .map_err(|e| CertError::FileWrite(self.dir.clone(), e))?;
        }

        let mut next = HashMap::with_capacity(self.domains.len());
        let mut outcomes = Vec::with_capacity(self.domains.len());
        for domain in &self.domains {
            let (outcome, key) = self.ensure_leaf(ca, domain)?;
            match &outcome {
                LeafOutcome::Reused { days_remaining } => {
                    tracing::info!(domain = %domain, days_remaining, "reusing leaf certificate");
                }
                LeafOutcome::Issued { reason } => {
                    tracing::info!(
                        domain = %domain,
                        reason,
                        valid_days = self.policy.valid_days,
                        cert = %self.cert_path(domain).display(),
                        "issued leaf certificate"
                    );
                }
            }
            next.insert(domain.clone(), Arc::new(key));
            outcomes.push((domain.clone(), outcome));
        }

        *self.certs.write() = Arc::new(next);
        Ok(outcomes)
    }

    fn ensure_leaf(&self, ca: &LocalCA, domain: &str) -> Result<(LeafOutcome, CertifiedKey)> {
        let reason = match self.check_existing(ca, domain) {
            Ok(Some((days_remaining, key))) => {
                return Ok((LeafOutcome::Reused { days_remaining }, key));
            }
            Ok(None) => "within renewal window",
            Err(reason) => reason,
        };

        let issued = ca
            .issue_leaf(domain, self.policy.valid_days)
            .map_err(|source| CertError::Issue {
                domain: domain.to_string(),
                source,
            })?;

        paths::write_private_file(&self.key_path(domain), issued.key_pem.as_bytes()).map_err(
            |source| CertError::KeyWrite {
                domain: domain.to_string(),
                source,
            },
        )?;
        let cert_path = self.cert_path(domain);
        paths::write_private_file(&cert_path, issued.cert_pem.as_bytes())
            .map_err(|e| CertError::FileWrite(cert_path.clone(), e))?;

        let key = certified_key(domain, &issued.cert_pem, &issued.key_pem)?;
        Ok((LeafOutcome::Issued { reason }, key))
    }

    /// `Ok(Some)` when the files on disk can be served as they are,
    /// `Ok(None)` when they are due for renewal, `Err(reason)` when unusable.
    fn check_existing(
        &self,
        ca: &LocalCA,
        domain: &str,
    ) -> std::result::Result<Option<(i64, CertifiedKey)>, &'static str> {
        let cert_pem = fs::read_to_string(self.cert_path(domain)).map_err(|_| "missing")?;
        let key_pem = fs::read_to_string(self.key_path(domain)).map_err(|_| "missing key")?;

        let (_, pem) = parse_x509_pem(cert_pem.as_bytes()).map_err(|_| "unparseable")?;
        let cert = pem.parse_x509().map_err(|_| "unparseable")?;
        if !ca.is_issuer_of(&pem.contents) {
            return Err("not signed by current root");
        }

        let not_after = cert.validity().not_after.timestamp();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        if self.policy.needs_renewal(not_after, now) {
            return Ok(None);
        }

        let key = certified_key(domain, &cert_pem, &key_pem).map_err(|_| "unreadable key")?;
        // Keys whose public half cannot be extracted are not held against the pair.
        if let Err(rustls::Error::InconsistentKeys(InconsistentKeys::KeyMismatch)) = key.keys_match()
        {
            return Err("key does not match certificate");
        }
        Ok(Some(((not_after - now) / SECS_PER_DAY, key)))
    }
}

/// Build the rustls signing bundle from PEM strings
pub(crate) fn certified_key(domain: &str, cert_pem: &str, key_pem: &str) -> Result<CertifiedKey> {
    let chain = rustls_pemfile::certs(&mut cert_pem.as_bytes())
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| CertError::ParseError(format!("{domain}: {e}")))?;
    if chain.is_empty() {
        return Err(CertError::ParseError(format!("{domain}: no certificate in PEM")));
    }

    let key = rustls_pemfile::private_key(&mut key_pem.as_bytes())
        .map_err(|e| CertError::KeyLoad(domain.to_string(), e.to_string()))?
        .ok_or_else(|| CertError::KeyLoad(domain.to_string(), "no private key in PEM".into()))?;
    let signing_key = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| CertError::KeyLoad(domain.to_string(), e.to_string()))?;

    Ok(CertifiedKey::new(chain, signing_key))
}

/// Periodically repeat the startup check-and-replace until shutdown.
///
/// Failures are logged and retried on the next tick; the previously
/// published keys keep serving meanwhile.
pub async fn run_renewal(
    store: Arc<CertStore>,
    ca: Arc<LocalCA>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // First tick completes immediately; startup already ran the check.
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return;
                }
            }
            _ = ticker.tick() => {
                let store = Arc::clone(&store);
                let ca = Arc::clone(&ca);
                let result = tokio::task::spawn_blocking(move || store.ensure_all(&ca)).await;
                match result {
                    Ok(Ok(outcomes)) => {
                        let issued = outcomes
                            .iter()
                            .filter(|(_, o)| matches!(o, LeafOutcome::Issued { .. }))
                            .count();
                        tracing::debug!(checked = outcomes.len(), issued, "certificate renewal check finished");
                    }
                    Ok(Err(e)) => tracing::error!(error = %e, "certificate renewal failed"),
                    Err(e) => tracing::error!(error = %e, "certificate renewal task panicked"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy() -> RenewalPolicy {
        RenewalPolicy {
            valid_days: 90,
            renew_before_days: 30,
        }
    }

    fn store_for(dir: &Path, domains: &[&str]) -> CertStore {
        CertStore::new(dir, policy(), domains.iter().map(|d| d.to_string()).collect())
    }

    fn write_leaf(store: &CertStore, ca: &LocalCA, domain: &str, valid_days: u32) {
        let leaf = ca.issue_leaf(domain, valid_days).unwrap();
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.cert_path(domain), leaf.cert_pem).unwrap();
        fs::write(store.key_path(domain), leaf.key_pem).unwrap();
    }

    #[test]
    fn needs_renewal_at_or_below_threshold() {
        let p = policy();
        let now = 1_700_000_000;
        assert!(!p.needs_renewal(now + 31 * SECS_PER_DAY, now));
        assert!(p.needs_renewal(now + 30 * SECS_PER_DAY, now));
        assert!(p.needs_renewal(now + 29 * SECS_PER_DAY, now));
        assert!(p.needs_renewal(now - 1, now));
    }

    #[test]
    fn issues_missing_leaf_and_serves_it() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(&temp.path().join("certs"), &["example.com"]);

        let outcomes = store.ensure_all(&ca).unwrap();
        assert_eq!(
            outcomes,
            vec![(
                "example.com".to_string(),
                LeafOutcome::Issued { reason: "missing" }
            )]
        );
        assert!(store.cert_path("example.com").is_file());
        assert!(store.key_path("example.com").is_file());
        assert!(store.get("example.com").is_some());
        assert!(store.get("EXAMPLE.com.").is_some());
        assert!(store.get("unknown.test").is_none());
    }

    #[test]
    fn reuses_leaf_with_sixty_days_left_without_touching_files() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(temp.path(), &["example.com"]);
        write_leaf(&store, &ca, "example.com", 60);

        let cert_before = fs::read(store.cert_path("example.com")).unwrap();
        let key_before = fs::read(store.key_path("example.com")).unwrap();
        let mtime_before = fs::metadata(store.cert_path("example.com"))
            .unwrap()
            .modified()
            .unwrap();

        let outcomes = store.ensure_all(&ca).unwrap();
        assert!(matches!(outcomes[0].1, LeafOutcome::Reused { days_remaining } if days_remaining >= 59));

        assert_eq!(fs::read(store.cert_path("example.com")).unwrap(), cert_before);
        assert_eq!(fs::read(store.key_path("example.com")).unwrap(), key_before);
        let mtime_after = fs::metadata(store.cert_path("example.com"))
            .unwrap()
            .modified()
            .unwrap();
        assert_eq!(mtime_before, mtime_after);
    }

    #[test]
    fn reissues_leaf_inside_renewal_window() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(temp.path(), &["example.com"]);
        write_leaf(&store, &ca, "example.com", 10);
        let before = fs::read(store.cert_path("example.com")).unwrap();

        let outcomes = store.ensure_all(&ca).unwrap();
        assert_eq!(
            outcomes[0].1,
            LeafOutcome::Issued {
                reason: "within renewal window"
            }
        );
        assert_ne!(fs::read(store.cert_path("example.com")).unwrap(), before);
    }

    #[test]
    fn reissues_leaf_signed_by_previous_root() {
        let temp = TempDir::new().unwrap();
        let old_ca = LocalCA::generate("Old Root").unwrap();
        let new_ca = LocalCA::generate("New Root").unwrap();
        let store = store_for(temp.path(), &["example.com"]);
        write_leaf(&store, &old_ca, "example.com", 80);

        let outcomes = store.ensure_all(&new_ca).unwrap();
        assert_eq!(
            outcomes[0].1,
            LeafOutcome::Issued {
                reason: "not signed by current root"
            }
        );
    }

    #[test]
    fn reissues_leaf_when_key_file_is_missing() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(temp.path(), &["example.com"]);
        write_leaf(&store, &ca, "example.com", 80);
        fs::remove_file(store.key_path("example.com")).unwrap();

        let outcomes = store.ensure_all(&ca).unwrap();
        assert_eq!(outcomes[0].1, LeafOutcome::Issued { reason: "missing key" });
    }

    #[test]
    fn reissues_leaf_whose_key_belongs_to_another_certificate() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(temp.path(), &["example.com"]);
        write_leaf(&store, &ca, "example.com", 80);
        // Same root and lifetime, but the key on disk is from a different leaf.
        let stray = ca.issue_leaf("example.com", 80).unwrap();
        fs::write(store.key_path("example.com"), stray.key_pem).unwrap();

        let outcomes = store.ensure_all(&ca).unwrap();
        assert_eq!(
            outcomes[0].1,
            LeafOutcome::Issued {
                reason: "key does not match certificate"
            }
        );
        store.get("example.com").unwrap().keys_match().unwrap();
    }

    #[test]
    fn key_write_error_names_domain_not_path() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(temp.path(), &["example.com"]);
        fs::create_dir_all(store.key_path("example.com")).unwrap();

        let err = store.ensure_all(&ca).unwrap_err();
        assert!(matches!(err, CertError::KeyWrite { ref domain, .. } if domain == "example.com"));
        assert!(!err.to_string().contains("example.com.key"), "{err}");
    }

    #[test]
    fn refresh_swaps_in_new_key_set() {
        let temp = TempDir::new().unwrap();
        let ca = LocalCA::generate("Store Root").unwrap();
        let store = store_for(temp.path(), &["a.test", "b.test"]);
        store.ensure_all(&ca).unwrap();
        let first = store.get("a.test").unwrap();

        // Force reissue of one domain by removing its certificate.
        fs::remove_file(store.cert_path("a.test")).unwrap();
        store.ensure_all(&ca).unwrap();

        let second = store.get("a.test").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.cert[0], second.cert[0]);
        assert!(store.get("b.test").is_some());
    }

    #[tokio::test]
    async fn renewal_task_exits_on_shutdown() {
        let temp = TempDir::new().unwrap();
        let ca = Arc::new(LocalCA::generate("Store Root").unwrap());
        let store = Arc::new(store_for(temp.path(), &["example.com"]));
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(run_renewal(store, ca, Duration::from_secs(3600), rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("renewal task exits")
            .unwrap();
    }

    #[tokio::test]
    async fn renewal_task_reissues_expiring_leaf() {
        let temp = TempDir::new().unwrap();
        let ca = Arc::new(LocalCA::generate("Store Root").unwrap());
        let store = Arc::new(store_for(temp.path(), &["example.com"]));
        write_leaf(&store, &ca, "example.com", 5);
        let before = fs::read(store.cert_path("example.com")).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_renewal(
            Arc::clone(&store),
            Arc::clone(&ca),
            Duration::from_millis(50),
            rx,
        ));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.get("example.com").is_none() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(store.get("example.com").is_some());
        assert_ne!(fs::read(store.cert_path("example.com")).unwrap(), before);
    }
}
