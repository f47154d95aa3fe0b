use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::NssConfig;

/// NSS database format, decided by the marker file in the profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbFormat {
    /// `cert9.db`
    Sql,
    /// `cert8.db`, legacy Berkeley DB
    Dbm,
}

impl DbFormat {
    pub fn prefix(self) -> &'static str {
        match self {
            DbFormat::Sql => "sql:",
            DbFormat::Dbm => "dbm:",
        }
    }

    pub fn marker(self) -> &'static str {
        match self {
            DbFormat::Sql => "cert9.db",
            DbFormat::Dbm => "cert8.db",
        }
    }

    /// Format of the database in `dir`; `cert9.db` wins over `cert8.db`.
    pub fn detect(dir: &Path) -> Option<Self> {
        [DbFormat::Sql, DbFormat::Dbm]
            .into_iter()
            .find(|format| dir.join(format.marker()).exists())
    }
}

/// A discovered NSS database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub format: DbFormat,
    pub path: PathBuf,
}

impl Profile {
    /// Database argument for `certutil -d`, e.g. `sql:/home/me/.pki/nssdb`.
    pub fn db_arg(&self) -> String {
        format!("{}{}", self.format.prefix(), self.path.display())
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.db_arg())
    }
}

/// Candidate directories: configured databases, then profile glob matches.
fn candidates(config: &NssConfig) -> Vec<PathBuf> {
    let mut dirs = config.databases.clone();
    for pattern in &config.profile_globs {
        match glob::glob(pattern) {
            Ok(paths) => dirs.extend(paths.filter_map(|p| p.ok())),
            Err(e) => tracing::debug!("Skipping profile pattern {pattern:?}: {e}"),
        }
    }
    dirs
}

/// Usable NSS databases, in candidate order. Reads the filesystem only.
pub fn discover(config: &NssConfig) -> Vec<Profile> {
    candidates(config)
        .into_iter()
        .filter(|dir| dir.is_dir())
        .filter_map(|path| {
            let format = DbFormat::detect(&path)?;
            Some(Profile { format, path })
        })
        .collect()
}
