//! Single-instance guard for the desktop shell.
//!
//! Ensures only one shell/backend pair runs per machine using file-based
//! locking. A second launch fails to acquire the lock and must exit
//! immediately, silently, without touching the environment or spawning
//! anything.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Information about the running shell instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    /// Backend URL the running instance supervises.
    pub backend_url: String,
    /// Process ID of the running instance.
    pub pid: u32,
    /// Version of the running instance.
    pub version: String,
    /// When the instance started.
    pub started_at: DateTime<Utc>,
}

/// The lock is held by another instance.
///
/// Not user-visible: the new instance exits without displaying an error.
#[derive(Debug, thiserror::Error)]
#[error("another instance is already running")]
pub struct LockUnavailable {
    /// Info about the instance holding the lock, when readable.
    pub running: Option<InstanceInfo>,
}

/// A held single-instance lock.
///
/// Held for the process lifetime; the OS releases the underlying file
/// lock when the process exits, however it exits.
pub struct AppLock {
    _lock_file: File,
    info_path: PathBuf,
}

impl AppLock {
    /// Attempt to acquire the app lock.
    ///
    /// A single point-in-time test: no retries, no waiting. Returns
    /// `Err(LockUnavailable)` when another instance holds the lock.
    pub fn try_acquire(lock_dir: Option<&Path>) -> Result<Self, LockUnavailable> {
        let base = match lock_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_lock_dir(),
        };
        let lock_path = base.join("app.lock");
        let info_path = base.join("instance.json");

        std::fs::create_dir_all(&base).ok();

        let lock_file = match OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&lock_path)
        {
            Ok(f) => f,
            Err(e) => {
                warn!("[singleton] Failed to open lock file: {}", e);
                return Err(LockUnavailable {
                    running: read_instance_info(&info_path),
                });
            }
        };

        // Non-blocking exclusive lock
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            let fd = lock_file.as_raw_fd();
            let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
            if result != 0 {
                info!("[singleton] Another instance is already running");
                return Err(LockUnavailable {
                    running: read_instance_info(&info_path),
                });
            }
        }

        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawHandle;
            use windows_sys::Win32::Foundation::HANDLE;
            use windows_sys::Win32::Storage::FileSystem::{
                LockFileEx, LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY,
            };

            let handle = lock_file.as_raw_handle() as HANDLE;
            let mut overlapped = unsafe { std::mem::zeroed() };
            let result = unsafe {
                LockFileEx(
                    handle,
                    LOCKFILE_EXCLUSIVE_LOCK | LOCKFILE_FAIL_IMMEDIATELY,
                    0,
                    1,
                    0,
                    &mut overlapped,
                )
            };
            if result == 0 {
                info!("[singleton] Another instance is already running");
                return Err(LockUnavailable {
                    running: read_instance_info(&info_path),
                });
            }
        }

        info!("[singleton] Acquired app lock");

        Ok(Self {
            _lock_file: lock_file,
            info_path,
        })
    }

    /// Write instance info after successful startup.
    pub fn write_info(&self, backend_url: &str) -> std::io::Result<()> {
        let info = InstanceInfo {
            backend_url: backend_url.to_string(),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now(),
        };

        let json = serde_json::to_string_pretty(&info)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        std::fs::write(&self.info_path, json)?;
        info!("[singleton] Wrote instance info to {:?}", self.info_path);

        Ok(())
    }
}

impl Drop for AppLock {
    fn drop(&mut self) {
        // Clean up info file when the instance exits
        if self.info_path.exists() {
            std::fs::remove_file(&self.info_path).ok();
        }
        info!("[singleton] Released app lock");
    }
}

/// Default directory holding the lock and instance-info files.
pub fn default_lock_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("gridsim")
}

/// Read instance info from the info file.
fn read_instance_info(path: &Path) -> Option<InstanceInfo> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_lock_dir() {
        let dir = default_lock_dir();
        assert!(dir.to_string_lossy().contains("gridsim"));
    }

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();

        let lock = AppLock::try_acquire(Some(temp.path())).unwrap();
        lock.write_info("http://127.0.0.1:5050").unwrap();

        let info_path = temp.path().join("instance.json");
        let info: InstanceInfo =
            serde_json::from_str(&std::fs::read_to_string(&info_path).unwrap()).unwrap();
        assert_eq!(info.backend_url, "http://127.0.0.1:5050");
        assert_eq!(info.pid, std::process::id());

        drop(lock);
        // Info file is cleaned up on release
        assert!(!info_path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();

        let first = AppLock::try_acquire(Some(temp.path())).unwrap();
        first.write_info("http://127.0.0.1:5050").unwrap();

        let second = AppLock::try_acquire(Some(temp.path()));
        let err = second.err().expect("second acquire should fail");
        let running = err.running.expect("instance info should be readable");
        assert_eq!(running.pid, std::process::id());

        drop(first);

        // Once released, the lock can be taken again
        assert!(AppLock::try_acquire(Some(temp.path())).is_ok());
    }
}
