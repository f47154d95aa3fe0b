//! certutil resolution and bundled provisioning
//!
//! Lookup order:
//! 1. the configured path
//! 2. the bundle supplied by the application, extracted into a temp dir
//! 3. `certutil` on `PATH`
//! 4. on macOS, the Homebrew `nss` formula
//!
//! Extractions are process-wide: one registry, keyed by extraction dir, is
//! shared by every provider, so a dir is written at most once until some
//! provider cleans it up. Unless disabled in [`NssConfig`], the first
//! extraction installs a Ctrl-C handler that removes every registered dir and
//! exits; it takes the registry lock, so it never deletes a half-written tool.

use flate2::read::GzDecoder;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, Once};

use crate::config::NssConfig;
use crate::error::{Error, Result};

/// Exit status after an interrupt, as for a shell killed by SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Extraction dir to the certutil extracted into it.
static EXTRACTED: Mutex<BTreeMap<PathBuf, PathBuf>> = Mutex::new(BTreeMap::new());
static INTERRUPT_HANDLER: Once = Once::new();

/// A gzip-compressed file shipped inside the application
#[derive(Clone)]
pub struct EmbeddedFile {
    name: String,
    gz: Cow<'static, [u8]>,
}

impl EmbeddedFile {
    /// `name` is the file name inside the extraction dir; a `.gz` suffix is
    /// dropped.
    pub fn new(name: impl Into<String>, gz: impl Into<Cow<'static, [u8]>>) -> Self {
        Self {
            name: name.into(),
            gz: gz.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        let base = self.name.rsplit(['/', '\\']).next().unwrap_or(&self.name);
        base.strip_suffix(".gz").unwrap_or(base)
    }
}

impl std::fmt::Debug for EmbeddedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedFile")
            .field("name", &self.name)
            .field("compressed_len", &self.gz.len())
            .finish()
    }
}

/// certutil and the libraries it needs, for hosts without NSS tools
///
/// Extracting a bundle installs a process-wide Ctrl-C handler, and `ctrlc`
/// allows one per process. Applications with their own handler set
/// [`NssConfig::interrupt_cleanup`] to `false` and call `cleanup()` from it.
///
/// ```ignore
/// let bundle = Bundle::new()
///     .with_file(EmbeddedFile::new("certutil.gz", &include_bytes!("certutil.gz")[..]))
///     .with_file(EmbeddedFile::new("libnss3.so.gz", &include_bytes!("libnss3.so.gz")[..]));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Bundle {
    files: Vec<EmbeddedFile>,
}

impl Bundle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file: EmbeddedFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn push(&mut self, file: EmbeddedFile) {
        self.files.push(file);
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[EmbeddedFile] {
        &self.files
    }
}

/// Where a resolved certutil came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertutilOrigin {
    Configured,
    Bundled { dir: PathBuf },
    System,
}

/// A resolved certutil binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certutil {
    pub path: PathBuf,
    pub origin: CertutilOrigin,
}

/// Resolves certutil, extracting the bundle when it is the chosen source
///
/// Configured and system tools are resolved once per provider. A bundled
/// tool lives in the process-wide registry, shared with every provider using
/// the same extraction dir.
#[derive(Debug)]
pub struct CertutilProvider {
    configured: Option<PathBuf>,
    extract_dir: PathBuf,
    interrupt_cleanup: bool,
    bundle: Bundle,
    resolved: Mutex<Option<Certutil>>,
}

impl CertutilProvider {
    pub fn new(config: &NssConfig, bundle: Bundle) -> Self {
        Self {
            configured: config.certutil.clone(),
            extract_dir: config.extract_dir.clone(),
            interrupt_cleanup: config.interrupt_cleanup,
            bundle,
            resolved: Mutex::new(None),
        }
    }

    /// The resolved tool, resolving or extracting it on first use.
    ///
    /// A failure is not remembered; the next call tries again.
    pub fn get(&self) -> Result<Certutil> {
        if self.uses_bundle() {
            let path = extract_once(&self.bundle, &self.extract_dir, self.interrupt_cleanup)?;
            return Ok(Certutil {
                path,
                origin: CertutilOrigin::Bundled {
                    dir: self.extract_dir.clone(),
                },
            });
        }

        let mut resolved = lock(&self.resolved);
        if let Some(certutil) = resolved.as_ref() {
            return Ok(certutil.clone());
        }

        let certutil = self.resolve()?;
        tracing::debug!("Using certutil at {}", certutil.path.display());
        *resolved = Some(certutil.clone());
        Ok(certutil)
    }

    /// Remove the extracted tool, if any, and forget the resolution.
    ///
    /// The extraction is shared, so this removes it for every provider using
    /// the same dir; their next `get()` extracts again.
    pub fn cleanup(&self) -> Result<()> {
        *lock(&self.resolved) = None;
        if self.uses_bundle() {
            remove_extracted(&self.extract_dir)?;
        }
        Ok(())
    }

    fn uses_bundle(&self) -> bool {
        self.configured.is_none() && !self.bundle.is_empty()
    }

    fn resolve(&self) -> Result<Certutil> {
        if let Some(path) = &self.configured {
            if !path.is_file() {
                return Err(Error::ToolProvisioning(format!(
                    "configured certutil {} does not exist",
                    path.display()
                )));
            }
            return Ok(Certutil {
                path: path.clone(),
                origin: CertutilOrigin::Configured,
            });
        }

        system_certutil()
            .map(|path| Certutil {
                path,
                origin: CertutilOrigin::System,
            })
            .ok_or_else(|| {
                Error::ToolProvisioning(
                    "certutil not found; install the NSS tools (e.g. libnss3-tools or nss)"
                        .to_string(),
                )
            })
    }
}

fn system_certutil() -> Option<PathBuf> {
    if let Ok(path) = which::which("certutil") {
        return Some(path);
    }
    homebrew_certutil()
}

#[cfg(target_os = "macos")]
fn homebrew_certutil() -> Option<PathBuf> {
    // Default Homebrew location, checked before running brew.
    let default = PathBuf::from("/usr/local/opt/nss/bin/certutil");
    if default.is_file() {
        return Some(default);
    }

    let out = std::process::Command::new("brew")
        .args(["--prefix", "nss"])
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let prefix = String::from_utf8_lossy(&out.stdout).trim().to_string();
    let path = Path::new(&prefix).join("bin").join("certutil");
    path.is_file().then_some(path)
}

#[cfg(not(target_os = "macos"))]
fn homebrew_certutil() -> Option<PathBuf> {
    None
}

/// The certutil extracted into `dir`, extracting `bundle` unless a previous
/// extraction is still registered and present.
fn extract_once(bundle: &Bundle, dir: &Path, interrupt_cleanup: bool) -> Result<PathBuf> {
    let mut registry = lock(&EXTRACTED);
    if let Some(path) = registry.get(dir)
        && path.is_file()
    {
        return Ok(path.clone());
    }
    if interrupt_cleanup {
        register_interrupt_cleanup();
    }

    let certutil = extract(bundle, dir)?;
    registry.insert(dir.to_path_buf(), certutil.clone());
    Ok(certutil)
}

/// Decompress every bundled file into `dir` and return the certutil path.
fn extract(bundle: &Bundle, dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(dir).map_err(|e| tool_io(dir, e))?;
    set_mode(dir, 0o755)?;

    let mut certutil = None;
    for file in bundle.files() {
        let name = file.file_name();
        let path = dir.join(name);
        write_executable(&path, &file.gz)?;
        if name == "certutil" || name == "certutil.exe" {
            certutil = Some(path);
        }
    }

    let certutil = certutil.ok_or_else(|| {
        Error::ToolProvisioning("the bundle does not contain a certutil executable".to_string())
    })?;
    tracing::info!("Extracted the bundled certutil to {}", dir.display());
    Ok(certutil)
}

fn write_executable(path: &Path, gz: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.create(true).write(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o755);
    }

    let mut out = options.open(path).map_err(|e| tool_io(path, e))?;
    let mut decoder = GzDecoder::new(gz);
    io::copy(&mut decoder, &mut out).map_err(|e| tool_io(path, e))?;
    // An existing file keeps its old mode through open().
    set_mode(path, 0o755)
}

fn set_mode(path: &Path, mode: u32) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| tool_io(path, e))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

fn remove_extracted(dir: &Path) -> Result<()> {
    let mut registry = lock(&EXTRACTED);
    if !registry.contains_key(dir) {
        return Ok(());
    }
    match fs::remove_dir_all(dir) {
        Ok(()) => tracing::debug!("Removed the bundled certutil at {}", dir.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(tool_io(dir, e)),
    }
    registry.remove(dir);
    Ok(())
}

fn register_interrupt_cleanup() {
    INTERRUPT_HANDLER.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            let registry = lock(&EXTRACTED);
            for dir in registry.keys() {
                if let Err(e) = fs::remove_dir_all(dir)
                    && e.kind() != io::ErrorKind::NotFound
                {
                    eprintln!(
                        "failed to remove bundled certutil at {}: {}",
                        dir.display(),
                        e
                    );
                }
            }
            std::process::exit(INTERRUPTED_EXIT_CODE);
        });
        if let Err(e) = installed {
            tracing::warn!("Bundled certutil will not be removed on Ctrl-C: {e}");
        }
    });
}

fn tool_io(path: &Path, source: io::Error) -> Error {
    Error::ToolIo {
        path: path.to_path_buf(),
        source,
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
