use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Mutex, MutexGuard, OnceLock};

/// Environment variable overriding the CA root directory.
pub const CAROOT_ENV: &str = "CAROOT";

/// Directory holding the local CA.
///
/// - `$CAROOT` when set and non-empty
/// - otherwise `mkcert` under the platform data directory (`%LOCALAPPDATA%`,
///   `~/Library/Application Support`, `$XDG_DATA_HOME` or `~/.local/share`)
/// - otherwise `mkcert` under the temp directory
///
/// Never empty and has no side effects.
pub fn ca_root() -> PathBuf {
    if let Ok(v) = std::env::var(CAROOT_ENV)
        && !v.trim().is_empty()
    {
        return PathBuf::from(v);
    }

    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("mkcert")
}

/// Serializes tests that modify the process environment.
#[cfg(test)]
pub(crate) fn test_env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
