//! Scripted stand-ins for certutil and sudo.
//!
//! The fake certutil keeps one `trusted-<name>` file per trusted CA inside the
//! database directory. A `readonly-once` file makes the next write fail with
//! `SEC_ERROR_READ_ONLY`; a `readonly` file makes every write fail. Every
//! invocation of either script is appended to `invocations.log` next to it.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use truststore::NssConfig;

pub const FAKE_CERTUTIL: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/invocations.log"
op=""
db=""
name=""
while [ $# -gt 0 ]; do
  case "$1" in
    -A|-V|-D) op="$1" ;;
    -d) shift; db="$1" ;;
    -n) shift; name="$1" ;;
    -t|-i|-u) shift ;;
  esac
  shift
done
db="${db#sql:}"
db="${db#dbm:}"
entry="$db/trusted-$(printf '%s' "$name" | tr ' ' '_')"
case "$op" in
  -V)
    if [ ! -f "$entry" ]; then
      echo "certutil: could not find certificate named \"$name\"" >&2
      exit 255
    fi
    ;;
  -A|-D)
    if [ -f "$db/readonly-once" ]; then
      rm -f "$db/readonly-once"
      echo "certutil: function failed: SEC_ERROR_READ_ONLY: read-only database" >&2
      exit 255
    fi
    if [ -f "$db/readonly" ]; then
      echo "certutil: function failed: SEC_ERROR_READ_ONLY: read-only database" >&2
      exit 255
    fi
    if [ "$op" = "-A" ]; then
      : > "$entry"
    else
      rm -f "$entry"
    fi
    ;;
esac
exit 0
"#;

pub const FAKE_SUDO: &str = r#"#!/bin/sh
echo "sudo $*" >> "$(dirname "$0")/invocations.log"
while [ $# -gt 0 ] && [ "$1" != "--" ]; do
  shift
done
shift
exec "$@"
"#;

/// A temp dir holding the fake tools and any number of fake profiles
pub struct FakeNss {
    pub temp: TempDir,
    pub certutil: PathBuf,
    pub sudo: PathBuf,
}

impl FakeNss {
    pub fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let bin = temp.path().join("bin");
        fs::create_dir_all(&bin).unwrap();
        let certutil = bin.join("certutil");
        let sudo = bin.join("sudo");
        write_script(&certutil, FAKE_CERTUTIL);
        write_script(&sudo, FAKE_SUDO);
        Self {
            temp,
            certutil,
            sudo,
        }
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.temp.path().join("profiles")
    }

    /// Create a profile directory with `marker` (`cert9.db` or `cert8.db`).
    pub fn profile(&self, name: &str, marker: &str) -> PathBuf {
        let dir = self.profiles_dir().join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(marker), "").unwrap();
        dir
    }

    pub fn config(&self) -> NssConfig {
        NssConfig {
            databases: Vec::new(),
            profile_globs: vec![format!("{}/*", self.profiles_dir().display())],
            browser_paths: Vec::new(),
            certutil: Some(self.certutil.clone()),
            extract_dir: self.temp.path().join("extract"),
            interrupt_cleanup: true,
            privilege_wrapper: self.sudo.display().to_string(),
            browsers: "Firefox".to_string(),
        }
    }

    /// Logged command lines of the scripts in `bin/`.
    pub fn invocations(&self) -> Vec<String> {
        invocations_in(self.certutil.parent().unwrap())
    }
}

pub fn invocations_in(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("invocations.log"))
        .map(|log| log.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Whether the fake certutil recorded `name` as trusted in `profile`.
pub fn is_trusted(profile: &Path, name: &str) -> bool {
    profile
        .join(format!("trusted-{}", name.replace(' ', "_")))
        .exists()
}

/// certutil operations on `profile`, e.g. `-A` lines.
pub fn count_ops(invocations: &[String], op: &str, profile: &Path) -> usize {
    let profile = profile.display().to_string();
    invocations
        .iter()
        .filter(|line| line.starts_with(op) && line.contains(&profile))
        .count()
}

pub fn gzip(content: &[u8]) -> Vec<u8> {
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content).unwrap();
    encoder.finish().unwrap()
}

fn write_script(path: &Path, content: &str) {
    fs::write(path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
}
