use std::path::PathBuf;
use thiserror::Error;

use crate::config::ConfigError;
use crate::trap::Trapped;

/// Errors returned by the truststore library
#[derive(Debug, Error)]
pub enum Error {
    #[error("ERROR: {host:?} is not a valid hostname, IP, URL or email")]
    InvalidHost { host: String },

    #[error("ERROR: {host:?} is not a valid hostname, IP, URL or email: {reason}")]
    InvalidHostEncoding { host: String, reason: String },

    #[error("Failed to load or create the CA at {}: {source}", root.display())]
    CaInitialization {
        root: PathBuf,
        #[source]
        source: Trapped,
    },

    #[error("ERROR: the local CA has not been loaded")]
    CaNotLoaded,

    #[error("Failed to create certificate: {0}")]
    Issuance(#[source] Trapped),

    #[error("ERROR: no {browsers} security databases found")]
    NoSecurityDatabases { browsers: String },

    #[error(
        "Installing in {browsers} failed. Note that if you never started {browsers}, you need to do that at least once."
    )]
    TrustVerification { browsers: String },

    #[error("Error setting up certutil: {0}")]
    ToolProvisioning(String),

    #[error("Error setting up certutil at {}: {source}", path.display())]
    ToolIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Trapped(#[from] Trapped),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error came from host validation, before any issuance.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidHost { .. } | Error::InvalidHostEncoding { .. }
        )
    }
}
