//! On-disk manifest storage.
//!
//! Each package keeps its state in `<state_dir>/<package>/`:
//!
//! ```text
//! .skillpack/
//!   react/
//!     manifest.json   # the one live manifest
//!     update.lock     # present while an update runs
//! ```
//!
//! Manifests are replaced atomically (temp file, fsync, rename), so a crash
//! mid-write leaves the previous manifest intact.

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use skillpack_core::Manifest;

pub fn package_state_dir(state_dir: &Path, package: &str) -> PathBuf {
    state_dir.join(package)
}

pub fn manifest_path(state_dir: &Path, package: &str) -> PathBuf {
    package_state_dir(state_dir, package).join("manifest.json")
}

/// Load the stored manifest, or [`Manifest::empty`] before the first build.
pub fn load_manifest(state_dir: &Path, package: &str) -> Result<Manifest> {
    let path = manifest_path(state_dir, package);
    if !path.exists() {
        return Ok(Manifest::empty());
    }
    let json = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    Manifest::from_json(&json).with_context(|| format!("Corrupt manifest: {}", path.display()))
}

/// Replace the stored manifest atomically.
pub fn save_manifest(state_dir: &Path, package: &str, manifest: &Manifest) -> Result<()> {
    let path = manifest_path(state_dir, package);
    let json = manifest.to_json()?;
    atomic_write(&path, json.as_bytes())
        .with_context(|| format!("Failed to write manifest: {}", path.display()))?;
    tracing::info!(package, version = %manifest.version, "manifest saved");
    Ok(())
}

/// Write `data` to a uniquely named sibling of `target`, fsync it, then
/// rename it over `target`.
pub fn atomic_write(target: &Path, data: &[u8]) -> Result<()> {
    let dir = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = dir.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        std::fs::rename(&tmp, target)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result?;

    // Persist the rename itself where the platform allows opening directories.
    if let Ok(dir_handle) = File::open(dir) {
        let _ = dir_handle.sync_all();
    }
    Ok(())
}

/// Exclusive per-package update lock. Removed when dropped.
#[derive(Debug)]
pub struct PackageLock {
    path: PathBuf,
}

impl PackageLock {
    /// Fails immediately if another update of `package` holds the lock.
    pub fn acquire(state_dir: &Path, package: &str) -> Result<Self> {
        let dir = package_state_dir(state_dir, package);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create state directory: {}", dir.display()))?;
        let path = dir.join("update.lock");

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                let _ = writeln!(file, "{}", std::process::id());
                Ok(Self { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => bail!(
                "Another update of '{}' is in progress (lock file {}). \
                 Remove it if no update is running.",
                package,
                path.display()
            ),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to create lock file: {}", path.display())),
        }
    }
}

impl Drop for PackageLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file");
        }
    }
}
