//! certutil invocation
//!
//! NSS databases owned by root (e.g. `/etc/pki/nssdb`) reject writes with
//! `SEC_ERROR_READ_ONLY`. Such a failure is retried exactly once through the
//! privilege wrapper with the same arguments.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Marker certutil prints when the database cannot be written.
pub const READ_ONLY_MARKER: &str = "SEC_ERROR_READ_ONLY";

const SUDO_PROMPT: &str = "--prompt=Sudo password:";

/// Outcome of one logical certutil operation
#[derive(Debug, Clone)]
pub struct CertutilRun {
    pub success: bool,
    /// Combined stdout and stderr of the last attempt.
    pub output: String,
    /// Whether the last attempt went through the privilege retry.
    pub escalated: bool,
}

/// Run certutil with `args`, retrying once with privileges on a read-only
/// database. Spawn failures are returned as errors.
pub fn run_certutil<S: AsRef<OsStr>>(
    certutil: &Path,
    args: &[S],
    wrapper: &str,
) -> std::io::Result<CertutilRun> {
    let first = combined_output(Command::new(certutil).args(args))?;
    if first.success || cfg!(windows) || !first.output.contains(READ_ONLY_MARKER) {
        return Ok(first);
    }

    tracing::info!(
        "certutil reported a read-only database; retrying with {}",
        if wrapper.is_empty() { "no wrapper" } else { wrapper }
    );
    let mut cmd = escalated_command(certutil, wrapper, running_as_root());
    cmd.args(args);
    let mut retry = combined_output(&mut cmd)?;
    retry.escalated = true;
    Ok(retry)
}

/// Run certutil once and report only whether it exited successfully.
pub fn certutil_succeeds<S: AsRef<OsStr>>(certutil: &Path, args: &[S]) -> bool {
    Command::new(certutil)
        .args(args)
        .output()
        .is_ok_and(|out| out.status.success())
}

/// Command for the privileged retry of `certutil`, without its arguments.
///
/// `<wrapper> --prompt=Sudo password: -- <certutil>` when a wrapper is
/// configured and found; the bare tool when running as root or otherwise.
pub fn escalated_command(certutil: &Path, wrapper: &str, is_root: bool) -> Command {
    if is_root || wrapper.is_empty() {
        return Command::new(certutil);
    }
    match resolve_wrapper(wrapper) {
        Some(wrapper) => {
            let mut cmd = Command::new(wrapper);
            cmd.arg(SUDO_PROMPT).arg("--").arg(certutil);
            cmd
        }
        None => {
            tracing::warn!("{wrapper} not found; retrying certutil without it");
            Command::new(certutil)
        }
    }
}

fn resolve_wrapper(wrapper: &str) -> Option<PathBuf> {
    let path = Path::new(wrapper);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(wrapper).ok()
}

fn combined_output(cmd: &mut Command) -> std::io::Result<CertutilRun> {
    let out = cmd.output()?;
    let mut output = String::from_utf8_lossy(&out.stdout).into_owned();
    output.push_str(&String::from_utf8_lossy(&out.stderr));
    Ok(CertutilRun {
        success: out.status.success(),
        output,
        escalated: false,
    })
}

#[cfg(unix)]
fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// Render a command line for logs and failure reports.
pub fn display_command<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut parts: Vec<OsString> = vec![program.as_os_str().to_os_string()];
    parts.extend(args.iter().map(|a| a.as_ref().to_os_string()));
    parts
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
