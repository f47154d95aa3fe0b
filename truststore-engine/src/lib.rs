//! Certificate engine for truststore
//!
//! Creates or loads a local development CA from a CA root directory and signs
//! leaf certificates with it, writing PEM files next to each other in an
//! output directory.
//!
//! Failure reporting:
//! - Public operations do not return errors. Any failure aborts the current
//!   flow through [`fatal`], which unwinds with an [`EngineError`] payload.
//! - Callers that must keep running catch the unwind and recover the error.
//! - The unwind is started with `resume_unwind`, so no panic hook output is
//!   printed for engine failures.

mod ca;
mod cert;
mod error;

pub use ca::{CertEngine, ROOT_KEY_NAME, ROOT_NAME};
pub use cert::{HostKind, SubjectName, file_names, is_wildcard_too_broad};
pub use error::{EngineError, Result};

/// Abort the current operation with `err`.
///
/// Requires unwinding panics; with `panic = "abort"` this terminates the
/// process.
pub fn fatal(err: impl Into<EngineError>) -> ! {
    let err = err.into();
    tracing::debug!("certificate engine failure: {err}");
    std::panic::resume_unwind(Box::new(err))
}

/// `user@host` of the current process, used in CA and leaf subjects.
pub(crate) fn user_and_hostname() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default();
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut out = user;
    if !host.is_empty() {
        out.push('@');
        out.push_str(&host);
    }
    out
}
