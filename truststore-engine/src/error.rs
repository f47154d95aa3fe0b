use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the certificate engine.
///
/// The engine never returns these from its public operations. They are the
/// payload of [`crate::fatal`], and callers recover them by catching the
/// unwind.
#[derive(Debug, Error)]
pub enum EngineError {
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

    #[error("ERROR: can't create new certificates because the CA key (rootCA-key.pem) is missing")]
    MissingCaKey,

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
