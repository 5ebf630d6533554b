//! Single-writer lock for a database file
//!
//! Advisory `fd-lock` on `<database>.lock`. The lock is held for as long as
//! the guard returned by [`WriterLock::try_hold`] lives.

use fd_lock::{RwLock, RwLockWriteGuard};
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{StoreError, StoreResult};

/// Lock file guarding a database against concurrent runs.
pub struct WriterLock {
    lock: RwLock<File>,
    path: PathBuf,
}

impl WriterLock {
    /// Lock file path for `database`.
    pub fn lock_path(database: &Path) -> PathBuf {
        let mut name = database.as_os_str().to_owned();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Open (creating if needed) the lock file for `database`.
    pub fn open(database: &Path) -> StoreResult<Self> {
        let path = Self::lock_path(database);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Io(format!("failed to create {}: {e}", parent.display())))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| StoreError::Io(format!("failed to open {}: {e}", path.display())))?;
        Ok(Self {
            lock: RwLock::new(file),
            path,
        })
    }

    /// Take the exclusive lock without blocking.
    pub fn try_hold(&mut self) -> StoreResult<RwLockWriteGuard<'_, File>> {
        let path = self.path.display().to_string();
        self.lock.try_write().map_err(|e| match e.kind() {
            ErrorKind::WouldBlock => StoreError::Locked(path),
            _ => StoreError::Io(format!("failed to lock {path}: {e}")),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
