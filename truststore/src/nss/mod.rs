//! NSS trust stores
//!
//! Firefox profiles and the system/Chromium NSS databases each hold their own
//! trust anchors. The CA is added to every database found, under its unique
//! name, with the `C,,` trust flags (trusted issuer of TLS server
//! certificates).

mod certutil;
pub mod exec;
mod profile;

use std::ffi::OsString;
use std::path::Path;

use crate::config::NssConfig;
use crate::error::{Error, Result};

pub use certutil::{Bundle, Certutil, CertutilOrigin, CertutilProvider, EmbeddedFile};
pub use profile::{DbFormat, Profile};

/// A certutil operation that failed on one profile
#[derive(Debug, Clone)]
pub struct ProfileFailure {
    pub profile: Profile,
    pub command: String,
    pub output: String,
}

/// Per-profile outcome of [`NssStore::install`]
#[derive(Debug, Clone, Default)]
pub struct InstallReport {
    pub installed: Vec<Profile>,
    pub failures: Vec<ProfileFailure>,
}

/// Per-profile outcome of [`NssStore::uninstall`]
#[derive(Debug, Clone, Default)]
pub struct UninstallReport {
    pub removed: Vec<Profile>,
    /// Profiles that did not trust the CA.
    pub skipped: Vec<Profile>,
    pub failures: Vec<ProfileFailure>,
}

/// NSS databases reachable with one configuration
#[derive(Debug)]
pub struct NssStore {
    config: NssConfig,
    certutil: CertutilProvider,
}

impl NssStore {
    pub fn new(config: NssConfig) -> Self {
        Self::with_bundle(config, Bundle::new())
    }

    pub fn with_bundle(config: NssConfig, bundle: Bundle) -> Self {
        let certutil = CertutilProvider::new(&config, bundle);
        Self { config, certutil }
    }

    pub fn config(&self) -> &NssConfig {
        &self.config
    }

    pub fn certutil(&self) -> &CertutilProvider {
        &self.certutil
    }

    /// Usable databases right now. Profiles appear when a browser first
    /// starts, so this is never cached.
    pub fn profiles(&self) -> Vec<Profile> {
        profile::discover(&self.config)
    }

    /// Call `f` for every usable database and return how many were visited.
    pub fn for_each_profile(&self, mut f: impl FnMut(&Profile)) -> usize {
        let profiles = self.profiles();
        for p in &profiles {
            f(p);
        }
        profiles.len()
    }

    /// Whether NSS looks in use on this machine: a known database directory
    /// or a Firefox installation exists.
    pub fn has_nss(&self) -> bool {
        self.config
            .databases
            .iter()
            .chain(self.config.browser_paths.iter())
            .any(|p| p.exists())
    }

    /// Whether every database trusts the CA named `ca_name`.
    ///
    /// False when no database exists.
    pub fn check(&self, ca_name: &str) -> Result<bool> {
        let certutil = self.certutil.get()?;
        let mut trusted = true;
        let found = self.for_each_profile(|profile| {
            if !is_trusted_in(&certutil.path, profile, ca_name) {
                tracing::debug!("{ca_name:?} is not trusted in {profile}");
                trusted = false;
            }
        });
        Ok(found > 0 && trusted)
    }

    /// Add the CA certificate at `root_cert` to every database.
    ///
    /// Failing databases are reported and skipped. Errors when there is no
    /// database at all, or when the CA is not trusted everywhere afterwards.
    pub fn install(&self, ca_name: &str, root_cert: &Path) -> Result<InstallReport> {
        let certutil = self.certutil.get()?;
        let mut report = InstallReport::default();
        let found = self.for_each_profile(|profile| {
            let args: Vec<OsString> = vec![
                "-A".into(),
                "-d".into(),
                profile.db_arg().into(),
                "-t".into(),
                "C,,".into(),
                "-n".into(),
                ca_name.into(),
                "-i".into(),
                root_cert.as_os_str().to_os_string(),
            ];
            match self.run(&certutil.path, profile, &args) {
                Ok(()) => report.installed.push(profile.clone()),
                Err(failure) => report.failures.push(failure),
            }
        });

        if found == 0 {
            return Err(Error::NoSecurityDatabases {
                browsers: self.config.browsers.clone(),
            });
        }
        if !self.check(ca_name)? {
            return Err(Error::TrustVerification {
                browsers: self.config.browsers.clone(),
            });
        }
        tracing::info!(
            "The local CA is now installed in the {} trust store",
            self.config.browsers
        );
        Ok(report)
    }

    /// Remove the CA named `ca_name` from every database that trusts it.
    pub fn uninstall(&self, ca_name: &str) -> Result<UninstallReport> {
        let certutil = self.certutil.get()?;
        let mut report = UninstallReport::default();
        self.for_each_profile(|profile| {
            if !is_trusted_in(&certutil.path, profile, ca_name) {
                report.skipped.push(profile.clone());
                return;
            }
            let args: Vec<OsString> = vec![
                "-D".into(),
                "-d".into(),
                profile.db_arg().into(),
                "-n".into(),
                ca_name.into(),
            ];
            match self.run(&certutil.path, profile, &args) {
                Ok(()) => report.removed.push(profile.clone()),
                Err(failure) => report.failures.push(failure),
            }
        });
        Ok(report)
    }

    /// Remove any extracted certutil.
    pub fn cleanup(&self) -> Result<()> {
        self.certutil.cleanup()
    }

    fn run(
        &self,
        certutil: &Path,
        profile: &Profile,
        args: &[OsString],
    ) -> std::result::Result<(), ProfileFailure> {
        let command = exec::display_command(Path::new("certutil"), &args[..3]);
        let output = match exec::run_certutil(certutil, args, &self.config.privilege_wrapper) {
            Ok(run) if run.success => return Ok(()),
            Ok(run) => run.output,
            Err(e) => e.to_string(),
        };
        tracing::warn!("{command} failed: {}", output.trim_end());
        Err(ProfileFailure {
            profile: profile.clone(),
            command,
            output,
        })
    }
}

fn is_trusted_in(certutil: &Path, profile: &Profile, ca_name: &str) -> bool {
    let db = profile.db_arg();
    exec::certutil_succeeds(certutil, &["-V", "-d", db.as_str(), "-u", "L", "-n", ca_name])
}
