//! The lock primitive: one exclusive marker file per held resource.
//!
//! A resource `id` maps to `<id>.pid` inside the configured lock directory.
//! The marker is created with **create_new** semantics (exclusive create), so
//! the filesystem is the sole arbiter between competing processes. The file
//! contents are the holder's process id, for diagnosability only.
//!
//! This layer is strictly non-blocking: an existing marker fails the attempt
//! immediately with [`ReslockError::AlreadyLocked`]. Retry and backoff are
//! the allocation engine's responsibility.

use crate::error::{ReslockError, Result};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Marker file extension.
pub const LOCK_EXT: &str = "pid";

/// A held marker file. Releasing removes it from disk.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
}

impl LockFile {
    /// Path of the marker file on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the marker file.
    ///
    /// Safe to call against a marker that is already gone: a missing file is
    /// treated as released. Single-release semantics are enforced one layer
    /// up, by the allocation token.
    pub fn release(self) -> Result<()> {
        debug!("removing lock file {}", self.path.display());
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ReslockError::Io(e)),
        }
    }
}

/// Marker file path for a resource id.
pub fn marker_path(lock_dir: &Path, resource_id: &str) -> PathBuf {
    lock_dir.join(format!("{resource_id}.{LOCK_EXT}"))
}

/// Try to acquire the marker file for a resource, without blocking.
///
/// Creates the lock directory if needed, then creates the marker exclusively
/// and writes this process id into it. An existing marker yields
/// [`ReslockError::AlreadyLocked`] carrying the recorded holder pid when it
/// is readable.
pub fn try_acquire(lock_dir: &Path, resource_id: &str) -> Result<LockFile> {
    if !lock_dir.exists() {
        fs::create_dir_all(lock_dir)?;
    }

    let path = marker_path(lock_dir, resource_id);
    debug!("trying lock using {}", path.display());

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                let holder = match fs::read_to_string(&path) {
                    Ok(pid) if !pid.trim().is_empty() => format!(" (pid {})", pid.trim()),
                    _ => String::new(),
                };
                ReslockError::AlreadyLocked {
                    resource_id: resource_id.to_string(),
                    holder,
                }
            } else {
                ReslockError::Io(e)
            }
        })?;

    if let Err(e) = file.write_all(std::process::id().to_string().as_bytes()) {
        // Do not leave a half-written marker behind.
        let _ = fs::remove_file(&path);
        return Err(ReslockError::Io(e));
    }

    Ok(LockFile { path })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn acquire_creates_marker_with_pid() {
        let dir = TempDir::new().unwrap();
        let lock = try_acquire(dir.path(), "dut-1").unwrap();

        let path = marker_path(dir.path(), "dut-1");
        assert_eq!(lock.path(), path);
        assert!(path.exists());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, std::process::id().to_string());
    }

    #[test]
    fn acquire_creates_missing_lock_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("locks");
        let _lock = try_acquire(&nested, "dut-1").unwrap();
        assert!(marker_path(&nested, "dut-1").exists());
    }

    #[test]
    fn second_acquire_fails_already_locked() {
        let dir = TempDir::new().unwrap();
        let _held = try_acquire(dir.path(), "dut-1").unwrap();

        let err = try_acquire(dir.path(), "dut-1").unwrap_err();
        match err {
            ReslockError::AlreadyLocked { resource_id, holder } => {
                assert_eq!(resource_id, "dut-1");
                assert!(holder.contains(&std::process::id().to_string()));
            }
            other => panic!("expected AlreadyLocked, got {other:?}"),
        }
    }

    #[test]
    fn release_removes_marker() {
        let dir = TempDir::new().unwrap();
        let lock = try_acquire(dir.path(), "dut-1").unwrap();
        lock.release().unwrap();
        assert!(!marker_path(dir.path(), "dut-1").exists());
    }

    #[test]
    fn release_of_missing_marker_is_ok() {
        let dir = TempDir::new().unwrap();
        let lock = try_acquire(dir.path(), "dut-1").unwrap();
        std::fs::remove_file(lock.path()).unwrap();
        lock.release().unwrap();
    }

    #[test]
    fn distinct_resources_do_not_contend() {
        let dir = TempDir::new().unwrap();
        let _a = try_acquire(dir.path(), "dut-1").unwrap();
        let _b = try_acquire(dir.path(), "dut-2").unwrap();
        assert!(marker_path(dir.path(), "dut-1").exists());
        assert!(marker_path(dir.path(), "dut-2").exists());
    }

    #[test]
    fn acquire_after_release_succeeds() {
        let dir = TempDir::new().unwrap();
        let lock = try_acquire(dir.path(), "dut-1").unwrap();
        lock.release().unwrap();
        let _again = try_acquire(dir.path(), "dut-1").unwrap();
    }
}
