use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an optional TOML configuration file.
pub const CONFIG_ENV: &str = "TRUSTSTORE_CONFIG";

/// Browser family named in trust-store messages
pub const NSS_BROWSERS: &str = "Firefox and/or Chrome/Chromium";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Library configuration, usually left at its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Overrides the CA root lookup (`CAROOT`, platform data directory).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_root: Option<PathBuf>,

    pub nss: NssConfig,
}

/// Where to look for NSS databases and how to drive certutil
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NssConfig {
    /// System and Chromium NSS database directories.
    pub databases: Vec<PathBuf>,

    /// Glob patterns matching browser profile directories.
    pub profile_globs: Vec<String>,

    /// Browser installations whose presence means NSS is in use.
    pub browser_paths: Vec<PathBuf>,

    /// Explicit certutil binary, checked before `PATH`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certutil: Option<PathBuf>,

    /// Directory the bundled certutil is extracted into.
    pub extract_dir: PathBuf,

    /// Install a Ctrl-C handler that removes the extracted certutil and
    /// exits with status 130. Turn off when the application owns Ctrl-C.
    pub interrupt_cleanup: bool,

    /// Program used to retry certutil on read-only databases. Empty to
    /// always retry without it.
    pub privilege_wrapper: String,

    /// Browser names used in error messages.
    pub browsers: String,
}

impl Default for NssConfig {
    fn default() -> Self {
        let home = dirs::home_dir();
        Self {
            databases: default_databases(home.as_deref()),
            profile_globs: default_profile_globs(home.as_deref()),
            browser_paths: default_browser_paths(),
            certutil: None,
            extract_dir: std::env::temp_dir().join("truststore-certutil"),
            interrupt_cleanup: true,
            privilege_wrapper: "sudo".to_string(),
            browsers: NSS_BROWSERS.to_string(),
        }
    }
}

fn default_databases(home: Option<&Path>) -> Vec<PathBuf> {
    let mut dbs = Vec::new();
    if let Some(home) = home {
        dbs.push(home.join(".pki/nssdb"));
        // Snapcraft
        dbs.push(home.join("snap/chromium/current/.pki/nssdb"));
    }
    // CentOS 7
    dbs.push(PathBuf::from("/etc/pki/nssdb"));
    dbs
}

fn default_profile_globs(home: Option<&Path>) -> Vec<String> {
    let mut globs = Vec::new();
    if let Some(home) = home {
        let home = home.display();
        globs.push(format!("{home}/Library/Application Support/Firefox/Profiles/*"));
        globs.push(format!("{home}/.mozilla/firefox/*"));
        globs.push(format!("{home}/snap/firefox/common/.mozilla/firefox/*"));
    }
    if let Some(appdata) = std::env::var_os("APPDATA")
        && !appdata.is_empty()
    {
        globs.push(format!(
            "{}\\Mozilla\\Firefox\\Profiles\\*",
            Path::new(&appdata).display()
        ));
    }
    globs
}

fn default_browser_paths() -> Vec<PathBuf> {
    [
        "/usr/bin/firefox",
        "/usr/bin/firefox-nightly",
        "/usr/bin/firefox-developer-edition",
        "/snap/firefox",
        "/Applications/Firefox.app",
        "/Applications/FirefoxDeveloperEdition.app",
        "/Applications/Firefox Developer Edition.app",
        "/Applications/Firefox Nightly.app",
        "C:\\Program Files\\Mozilla Firefox",
    ]
    .into_iter()
    .map(PathBuf::from)
    .collect()
}

impl Config {
    /// Load the file named by `TRUSTSTORE_CONFIG`, or the defaults when unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}
