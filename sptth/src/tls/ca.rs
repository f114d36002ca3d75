use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, PublicKeyData, SanType,
};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use x509_parser::pem::parse_x509_pem;

use crate::paths;

/// Root CA certificate validity period (10 years)
const CA_VALIDITY_DAYS: i64 = 3650;

/// Backdating applied to every certificate to tolerate clock skew
const CLOCK_SKEW_DAYS: i64 = 1;

const CA_ORGANIZATION: &str = "sptth";

pub const ROOT_CERT_FILE: &str = "rootCA.pem";
pub const ROOT_KEY_FILE: &str = "rootCA-key.pem";

/// Errors that can occur during CA operations
#[derive(Debug, Error)]
pub enum CaError {
    #[error("Failed to generate keypair: {0}")]
    KeypairGeneration(String),

    #[error("Failed to generate certificate: {0}")]
    CertificateGeneration(String),

    #[error("Failed to parse certificate/key: {0}")]
    Parse(String),

    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, std::io::Error),

    #[error("Failed to read root CA private key: {0}")]
    KeyRead(std::io::Error),

    #[error("Failed to write root CA private key: {0}")]
    KeyWrite(std::io::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, CaError>;

/// A generated certificate with its private key
pub struct Certificate {
    /// PEM-encoded certificate
    pub cert_pem: String,
    /// PEM-encoded private key
    pub key_pem: String,
}

/// Local root certificate authority
pub struct LocalCA {
    cert_pem: String,
    cert_der: Vec<u8>,
    key_pem: String,
    common_name: String,
    organization: String,
}

impl std::fmt::Debug for LocalCA {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCA")
            .field("common_name", &self.common_name)
            .finish_non_exhaustive()
    }
}

impl LocalCA {
    /// Generate a new root keypair and self-signed certificate
    pub fn generate(common_name: &str) -> Result<Self> {
        let params = ca_params(common_name, CA_ORGANIZATION);

        let key_pair =
            KeyPair::generate().map_err(|e| CaError::KeypairGeneration(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::CertificateGeneration(e.to_string()))?;

        Ok(Self {
            cert_pem: cert.pem(),
            cert_der: cert.der().to_vec(),
            key_pem: key_pair.serialize_pem(),
            common_name: common_name.to_string(),
            organization: CA_ORGANIZATION.to_string(),
        })
    }

    /// Rebuild a CA from persisted PEM files.
    ///
    /// The subject is read back from the certificate so leaves keep naming
    /// the issuer exactly as the trusted root does.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self> {
        let key = KeyPair::from_pem(key_pem)
            .map_err(|e| CaError::Parse(format!("Failed to parse CA private key: {}", e)))?;

        let (_, pem) = parse_x509_pem(cert_pem.as_bytes())
            .map_err(|e| CaError::Parse(format!("Failed to decode CA certificate PEM: {}", e)))?;
        let cert = pem
            .parse_x509()
            .map_err(|e| CaError::Parse(format!("Failed to parse CA certificate: {}", e)))?;

        if !cert.is_ca() {
            return Err(CaError::Validation(
                "root certificate is not a CA certificate".to_string(),
            ));
        }
        if cert.public_key().raw != key.subject_public_key_info().as_slice() {
            return Err(CaError::Validation(
                "root private key does not match root certificate".to_string(),
            ));
        }

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .ok_or_else(|| CaError::Validation("root certificate has no common name".to_string()))?
            .to_string();
        let organization = cert
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap_or(CA_ORGANIZATION)
            .to_string();

        Ok(Self {
            cert_pem: cert_pem.to_string(),
            cert_der: pem.contents.clone(),
            key_pem: key_pem.to_string(),
            common_name,
            organization,
        })
    }

    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn cert_der(&self) -> &[u8] {
        &self.cert_der
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    fn issuer(&self) -> Result<Issuer<'static, KeyPair>> {
        let key = KeyPair::from_pem(&self.key_pem)
            .map_err(|e| CaError::Parse(format!("Failed to parse CA private key: {}", e)))?;
        Ok(Issuer::new(
            ca_params(&self.common_name, &self.organization),
            key,
        ))
    }

    /// Issue a leaf certificate for `domain` valid for `valid_days`
    pub fn issue_leaf(&self, domain: &str, valid_days: u32) -> Result<Certificate> {
        let issuer = self.issuer()?;

        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, domain);
        dn.push(DnType::OrganizationName, self.organization.as_str());
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = vec![SanType::DnsName(domain.try_into().map_err(|e| {
            CaError::Validation(format!("Invalid domain name '{}': {:?}", domain, e))
        })?)];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(CLOCK_SKEW_DAYS);
        params.not_after = now + Duration::days(i64::from(valid_days));

        let leaf_key =
            KeyPair::generate().map_err(|e| CaError::KeypairGeneration(e.to_string()))?;
        let leaf_cert = params.signed_by(&leaf_key, &issuer).map_err(|e| {
            CaError::CertificateGeneration(format!("Failed to sign leaf certificate: {}", e))
        })?;

        Ok(Certificate {
            cert_pem: leaf_cert.pem(),
            key_pem: leaf_key.serialize_pem(),
        })
    }

    /// Whether the DER certificate carries a valid signature from this root
    pub fn is_issuer_of(&self, leaf_der: &[u8]) -> bool {
        let Ok((_, root)) = x509_parser::parse_x509_certificate(&self.cert_der) else {
            return false;
        };
        let Ok((_, leaf)) = x509_parser::parse_x509_certificate(leaf_der) else {
            return false;
        };
        leaf.issuer().as_raw() == root.subject().as_raw()
            && leaf.verify_signature(Some(root.public_key())).is_ok()
    }
}

fn ca_params(common_name: &str, organization: &str) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::CommonName, common_name);
    dn.push(DnType::OrganizationName, organization);
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];

    let now = OffsetDateTime::now_utc();
    params.not_before = now - Duration::days(CLOCK_SKEW_DAYS);
    params.not_after = now + Duration::days(CA_VALIDITY_DAYS);
    params
}

/// How the root identity came to be for this run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaOrigin {
    /// Both files existed and were reused; trust installation is skipped
    Loaded,
    /// A new root was generated and persisted; it still needs to be trusted
    Generated,
}

/// On-disk home of the root identity
#[derive(Debug, Clone)]
pub struct CaStore {
    dir: PathBuf,
}

impl CaStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn cert_path(&self) -> PathBuf {
        self.dir.join(ROOT_CERT_FILE)
    }

    pub fn key_path(&self) -> PathBuf {
        self.dir.join(ROOT_KEY_FILE)
    }

    /// Load the existing root or create (and persist) a new one.
    ///
    /// A directory holding only one of the two files is treated as empty and
    /// regenerated.
    pub fn load_or_generate(&self, common_name: &str) -> Result<(LocalCA, CaOrigin)> {
        let cert_path = self.cert_path();
        let key_path = self.key_path();

        match (cert_path.is_file(), key_path.is_file()) {
            (true, true) => return Ok((self.load()?, CaOrigin::Loaded)),
            (false, false) => {}
            (cert_exists, key_exists) => {
                tracing::warn!(
                    dir = %self.dir.display(),
                    cert_exists,
                    key_exists,
                    "incomplete root CA files; generating a new root"
                );
            }
        }

        let ca = LocalCA::generate(common_name)?;
        self.save(&ca)?;
        Ok((ca, CaOrigin::Generated))
    }

    fn load(&self) -> Result<LocalCA> {
        let cert_path = self.cert_path();
        let cert_pem =
            fs::read_to_string(&cert_path).map_err(|e| CaError::FileRead(cert_path.clone(), e))?;
        let key_pem = fs::read_to_string(self.key_path()).map_err(CaError::KeyRead)?;
        LocalCA::from_pem(&cert_pem, &key_pem)
    }

    /// Key first, certificate last: a visible certificate implies a complete pair.
    fn save(&self, ca: &LocalCA) -> Result<()> {
        paths::ensure_private_dir(&self.dir).map_err(|e| CaError::FileWrite(self.dir.clone(), e))?;

        paths::write_private_file(&self.key_path(), ca.key_pem.as_bytes())
            .map_err(CaError::KeyWrite)?;

        let cert_path = self.cert_path();
        paths::write_private_file(&cert_path, ca.cert_pem.as_bytes())
            .map_err(|e| CaError::FileWrite(cert_path.clone(), e))?;
        Ok(())
    }
}
