//! Local CA storage
//!
//! The CA lives in a root directory as two PEM files:
//! - `rootCA.pem`: the CA certificate, world-readable
//! - `rootCA-key.pem`: the CA private key, owner read-only
//!
//! A CA whose key file is missing can still be loaded (its certificate can be
//! trusted) but cannot sign new certificates.

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, KeyPair,
    KeyUsagePurpose,
};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use time::{Duration, OffsetDateTime};

use crate::error::{EngineError, Result};
use crate::{fatal, user_and_hostname};

/// File name of the CA certificate inside the CA root.
pub const ROOT_NAME: &str = "rootCA.pem";
/// File name of the CA private key inside the CA root.
pub const ROOT_KEY_NAME: &str = "rootCA-key.pem";

/// Root CA certificate validity period (10 years)
const CA_VALIDITY_DAYS: i64 = 3650;

/// Organization of the root CA, also the prefix of its unique name.
pub(crate) const CA_ORGANIZATION: &str = "mkcert development CA";

/// A loaded CA
#[derive(Clone)]
pub(crate) struct LoadedCa {
    pub(crate) cert_pem: String,
    /// Absent when `rootCA-key.pem` is missing.
    pub(crate) key_pem: Option<String>,
    unique_name: String,
}

/// Certificate engine bound to one CA root directory
#[derive(Clone, Default)]
pub struct CertEngine {
    ca_root: PathBuf,
    pub(crate) ca: Option<LoadedCa>,
}

impl fmt::Debug for CertEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertEngine")
            .field("ca_root", &self.ca_root)
            .field("unique_name", &self.ca_unique_name())
            .field("has_key", &self.has_key())
            .finish()
    }
}

impl CertEngine {
    /// Create an engine for `ca_root`. Nothing is read until [`Self::load_ca`].
    pub fn new(ca_root: impl Into<PathBuf>) -> Self {
        Self {
            ca_root: ca_root.into(),
            ca: None,
        }
    }

    pub fn ca_root(&self) -> &Path {
        &self.ca_root
    }

    pub fn root_cert_path(&self) -> PathBuf {
        self.ca_root.join(ROOT_NAME)
    }

    pub fn root_key_path(&self) -> PathBuf {
        self.ca_root.join(ROOT_KEY_NAME)
    }

    /// Whether a CA has been loaded
    pub fn is_loaded(&self) -> bool {
        self.ca.is_some()
    }

    /// Whether the loaded CA can sign certificates
    pub fn has_key(&self) -> bool {
        self.ca.as_ref().is_some_and(|ca| ca.key_pem.is_some())
    }

    /// PEM of the loaded CA certificate
    pub fn ca_cert_pem(&self) -> Option<&str> {
        self.ca.as_ref().map(|ca| ca.cert_pem.as_str())
    }

    /// Name under which the CA is stored in certificate databases.
    ///
    /// Derived from the CA serial number, so two CAs never share a name.
    pub fn ca_unique_name(&self) -> Option<&str> {
        self.ca.as_ref().map(|ca| ca.unique_name.as_str())
    }

    /// Load the CA from the CA root, creating it first if no certificate exists.
    ///
    /// Aborts through [`fatal`] on any failure.
    pub fn load_ca(&mut self) {
        if let Err(e) = self.try_load_ca() {
            fatal(e);
        }
    }

    fn try_load_ca(&mut self) -> Result<()> {
        let cert_path = self.root_cert_path();
        let key_path = self.root_key_path();

        if !cert_path.exists() {
            if key_path.exists() {
                return Err(EngineError::Validation(format!(
                    "found the CA key ({}) but not the CA certificate ({})",
                    key_path.display(),
                    cert_path.display()
                )));
            }
            self.new_ca()?;
        } else {
            tracing::debug!("Using the local CA at {}", self.ca_root.display());
        }

        let cert_pem =
            fs::read_to_string(&cert_path).map_err(|e| EngineError::FileRead(cert_path.clone(), e))?;
        let unique_name = unique_name_for(&cert_pem)?;

        let key_pem = if key_path.exists() {
            let key_pem = fs::read_to_string(&key_path)
                .map_err(|e| EngineError::FileRead(key_path.clone(), e))?;
            KeyPair::from_pem(&key_pem)
                .map_err(|e| EngineError::Parse(format!("Failed to parse CA private key: {}", e)))?;
            Some(key_pem)
        } else {
            tracing::warn!(
                "The CA key ({}) is missing; new certificates cannot be created",
                ROOT_KEY_NAME
            );
            None
        };

        self.ca = Some(LoadedCa {
            cert_pem,
            key_pem,
            unique_name,
        });
        Ok(())
    }

    fn new_ca(&self) -> Result<()> {
        fs::create_dir_all(&self.ca_root)
            .map_err(|e| EngineError::FileWrite(self.ca_root.clone(), e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.ca_root, fs::Permissions::from_mode(0o755))
                .map_err(|e| EngineError::FileWrite(self.ca_root.clone(), e))?;
        }

        let params = ca_params(&user_and_hostname());
        let key_pair =
            KeyPair::generate().map_err(|e| EngineError::KeypairGeneration(e.to_string()))?;
        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| EngineError::CertificateGeneration(e.to_string()))?;

        // Key first, so a half-written CA never has a certificate without key.
        let key_path = self.root_key_path();
        write_with_mode(&key_path, &key_pair.serialize_pem(), 0o400)?;
        write_with_mode(&self.root_cert_path(), &cert.pem(), 0o644)?;

        tracing::info!("Created a new local CA at {}", self.ca_root.display());
        Ok(())
    }
}

fn ca_params(user_and_host: &str) -> CertificateParams {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, CA_ORGANIZATION);
    dn.push(DnType::OrganizationalUnitName, user_and_host);
    dn.push(DnType::CommonName, format!("mkcert {user_and_host}"));
    params.distinguished_name = dn;

    // Only leaf certificates below this CA.
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + Duration::days(CA_VALIDITY_DAYS);
    params
}

fn unique_name_for(cert_pem: &str) -> Result<String> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(cert_pem.as_bytes())
        .map_err(|e| EngineError::Parse(format!("Failed to read the CA certificate: {}", e)))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| EngineError::Parse(format!("Failed to parse the CA certificate: {}", e)))?;
    Ok(format!("{} {}", CA_ORGANIZATION, cert.tbs_certificate.serial))
}

pub(crate) fn write_with_mode(path: &Path, contents: &str, mode: u32) -> Result<()> {
    // A previous read-only key would make the truncating write fail.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.exists() {
            let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
        }
    }

    fs::write(path, contents).map_err(|e| EngineError::FileWrite(path.to_path_buf(), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| EngineError::FileWrite(path.to_path_buf(), e))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    Ok(())
}
