//! Advisory lock on the backup directory.
//!
//! The free-space check is not a reservation: two runs writing into the same
//! directory could both pass it. Holding an exclusive `flock(2)` on a lock
//! file in the directory for the whole run makes the second run fail fast
//! instead.

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use libc::{EWOULDBLOCK, LOCK_EX, LOCK_NB, LOCK_UN, flock};
use tracing::debug;

use crate::error::{BackupError, Result};
use crate::paths::LOCK_FILE;

pub struct DirLock {
    file: File,
    path: PathBuf,
}

impl DirLock {
    /// Take the lock without blocking.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| BackupError::Lock {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        let result = unsafe { flock(file.as_raw_fd(), LOCK_EX | LOCK_NB) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            let reason = if err.raw_os_error() == Some(EWOULDBLOCK) {
                "another backup run is using this directory".to_string()
            } else {
                err.to_string()
            };
            return Err(BackupError::Lock { path, reason });
        }

        debug!(path = %path.display(), "Acquired backup directory lock");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        unsafe { flock(self.file.as_raw_fd(), LOCK_UN) };
        debug!(path = %self.path.display(), "Released backup directory lock");
    }
}
