//! Local development certificates
//!
//! Creates (or reuses) a local CA, issues certificates signed by it for
//! hostnames, IPs, emails and URLs, and adds the CA to the NSS trust stores
//! used by Firefox and Chrome/Chromium.
//!
//! ```no_run
//! let store = truststore::Truststore::new()?;
//! let cert = store.make_cert(&["example.test", "127.0.0.1"], std::path::Path::new("."))?;
//! println!("{}", cert.cert_file.display());
//! # Ok::<(), truststore::Error>(())
//! ```
//!
//! Failures inside the certificate engine and the NSS code are returned as
//! [`Error`] values; no call terminates the process.

pub mod config;
pub mod error;
pub mod hosts;
pub mod logging;
pub mod nss;
pub mod paths;
pub mod trap;

use once_cell::sync::OnceCell;
use std::path::{Path, PathBuf};
use truststore_engine::CertEngine;

pub use config::{Config, ConfigError, NssConfig};
pub use error::{Error, Result};
pub use hosts::{HostKind, Identifier, validate_hosts};
pub use nss::{
    Bundle, Certutil, CertutilOrigin, CertutilProvider, DbFormat, EmbeddedFile, InstallReport,
    NssStore, Profile, ProfileFailure, UninstallReport,
};
pub use paths::ca_root;
pub use trap::{Trapped, trap};
pub use truststore_engine::{ROOT_KEY_NAME, ROOT_NAME};

/// Paths of an issued certificate and its private key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cert {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Handle on the local CA and the NSS trust stores
#[derive(Debug)]
pub struct Truststore {
    ca_root: PathBuf,
    ca: OnceCell<CertEngine>,
    nss: NssStore,
}

/// Builder for [`Truststore`]
#[derive(Debug, Default)]
pub struct TruststoreBuilder {
    config: Config,
    bundle: Bundle,
}

impl TruststoreBuilder {
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// certutil to extract when the configuration names none.
    pub fn bundle(mut self, bundle: Bundle) -> Self {
        self.bundle = bundle;
        self
    }

    /// Create the store and load or create its CA.
    pub fn build(self) -> Result<Truststore> {
        let ca_root = self.config.ca_root.clone().unwrap_or_else(ca_root);
        let store = Truststore {
            ca_root,
            ca: OnceCell::new(),
            nss: NssStore::with_bundle(self.config.nss, self.bundle),
        };
        store.initialize()?;
        Ok(store)
    }
}

impl Truststore {
    /// Load configuration from `TRUSTSTORE_CONFIG` (if set), then load or
    /// create the CA.
    ///
    /// When this fails, [`logging::init`] with `verbose` set shows what the
    /// engine was doing.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::from_env()?)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> TruststoreBuilder {
        TruststoreBuilder::default()
    }

    /// Load or create the CA. Runs once; after a failure the next call
    /// tries again.
    pub fn initialize(&self) -> Result<()> {
        self.engine().map(|_| ())
    }

    fn engine(&self) -> Result<&CertEngine> {
        self.ca.get_or_try_init(|| {
            let mut engine = CertEngine::new(&self.ca_root);
            trap(|| engine.load_ca()).map_err(|source| Error::CaInitialization {
                root: self.ca_root.clone(),
                source,
            })?;
            Ok(engine)
        })
    }

    pub fn ca_root_path(&self) -> &Path {
        &self.ca_root
    }

    /// Name of the CA inside trust stores.
    pub fn ca_unique_name(&self) -> Result<String> {
        self.engine()?
            .ca_unique_name()
            .map(str::to_string)
            .ok_or(Error::CaNotLoaded)
    }

    pub fn nss(&self) -> &NssStore {
        &self.nss
    }

    /// Paths [`Self::make_cert`] writes for `hosts`. Validates the hosts but
    /// touches no files.
    pub fn cert_file<S: AsRef<str>>(&self, hosts: &[S], out_dir: &Path) -> Result<Cert> {
        let hosts = validate_hosts(hosts)?;
        Ok(cert_paths(&hosts, out_dir))
    }

    /// Issue one certificate valid for all `hosts`, written into `out_dir`.
    ///
    /// Internationalized hostnames are written in punycode. To get one
    /// certificate per host, call this once per host.
    pub fn make_cert<S: AsRef<str>>(&self, hosts: &[S], out_dir: &Path) -> Result<Cert> {
        let hosts = validate_hosts(hosts)?;
        let cert = cert_paths(&hosts, out_dir);
        let engine = self.engine()?;
        trap(|| engine.make_cert(&hosts, out_dir)).map_err(Error::Issuance)?;
        Ok(cert)
    }

    /// Whether NSS is in use on this machine.
    pub fn has_nss(&self) -> bool {
        self.nss.has_nss()
    }

    /// Add the CA to every NSS database found.
    ///
    /// When a bundled certutil gets extracted, a Ctrl-C handler is installed
    /// to remove it, unless [`NssConfig::interrupt_cleanup`] is off. `ctrlc`
    /// allows one handler per process, so applications with their own turn
    /// it off and call [`Self::cleanup`] there.
    pub fn install_trust(&self) -> Result<InstallReport> {
        let (name, root_cert) = self.trust_anchor()?;
        trap(|| self.nss.install(&name, &root_cert))?
    }

    /// Remove the CA from every NSS database that trusts it.
    pub fn uninstall_trust(&self) -> Result<UninstallReport> {
        let (name, _) = self.trust_anchor()?;
        trap(|| self.nss.uninstall(&name))?
    }

    /// Whether every NSS database found trusts the CA.
    pub fn is_trusted(&self) -> Result<bool> {
        let (name, _) = self.trust_anchor()?;
        trap(|| self.nss.check(&name))?
    }

    /// Remove temporary files, such as an extracted certutil.
    pub fn cleanup(&self) -> Result<()> {
        self.nss.cleanup()
    }

    fn trust_anchor(&self) -> Result<(String, PathBuf)> {
        let engine = self.engine()?;
        let name = engine.ca_unique_name().ok_or(Error::CaNotLoaded)?;
        Ok((name.to_string(), engine.root_cert_path()))
    }
}

fn cert_paths(hosts: &[Identifier], out_dir: &Path) -> Cert {
    let (cert_file, key_file) = truststore_engine::file_names(hosts, out_dir);
    Cert {
        cert_file,
        key_file,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_with_engine(engine: CertEngine) -> Truststore {
        Truststore {
            ca_root: engine.ca_root().to_path_buf(),
            ca: OnceCell::with_value(engine),
            nss: NssStore::new(NssConfig::default()),
        }
    }

    fn config(ca_root: &Path) -> Config {
        Config {
            ca_root: Some(ca_root.to_path_buf()),
            ..Config::default()
        }
    }

    #[test]
    fn make_cert_on_an_unloaded_engine_fails_without_unwinding() {
        let out = TempDir::new().unwrap();
        let store = store_with_engine(CertEngine::default());

        let err = store.make_cert(&["foo.baz.com"], out.path()).unwrap_err();

        assert!(matches!(err, Error::Issuance(_)));
        assert!(err.to_string().contains("can't create new certificates"), "{err}");
    }

    #[test]
    fn unloaded_engine_has_no_trust_anchor() {
        let store = store_with_engine(CertEngine::default());
        assert!(matches!(store.install_trust(), Err(Error::CaNotLoaded)));
    }

    #[test]
    fn cert_file_derives_paths_without_writing() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Truststore::with_config(config(ca.path())).unwrap();

        let cert = store
            .cert_file(&["bücher.example", "localhost"], out.path())
            .unwrap();

        assert_eq!(cert.cert_file, out.path().join("xn--bcher-kva.example+1.pem"));
        assert_eq!(cert.key_file, out.path().join("xn--bcher-kva.example+1-key.pem"));
        assert!(!cert.cert_file.exists());
    }

    #[test]
    fn invalid_host_is_rejected_before_issuance() {
        let ca = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        let store = Truststore::with_config(config(ca.path())).unwrap();

        let err = store.make_cert(&["ok.example", "bad host"], out.path()).unwrap_err();

        assert!(err.is_validation());
        assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
    }

    #[test]
    fn failed_initialization_is_reported_and_retried() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("caroot");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join(ROOT_KEY_NAME), "orphan key").unwrap();

        let err = Truststore::with_config(config(&root)).unwrap_err();
        assert!(matches!(err, Error::CaInitialization { .. }));
        assert!(err.to_string().contains("found the CA key"), "{err}");

        std::fs::remove_file(root.join(ROOT_KEY_NAME)).unwrap();
        let store = Truststore::with_config(config(&root)).unwrap();
        assert!(store.ca_unique_name().unwrap().starts_with("mkcert development CA "));
    }
}
