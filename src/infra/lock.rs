//! Exclusive advisory lock held for a whole upgrade/downgrade run.
//!
//! File databases get a sidecar `<db>.migrate.lock` locked with `flock`
//! semantics, so the lock is released by the OS if the process dies.
//! In-memory databases are private to their connection and need no lock.

use crate::error::AppError;
use crate::infra::db::DbLocation;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub struct MigrationLock {
    file: Option<File>,
    path: Option<PathBuf>,
    owner: Uuid,
}

impl MigrationLock {
    /// Take the lock without waiting. A held lock is reported as contention.
    pub fn acquire(location: &DbLocation) -> Result<Self, AppError> {
        let owner = Uuid::new_v4();
        let db_path = match location.path() {
            Some(p) => p,
            None => {
                return Ok(Self {
                    file: None,
                    path: None,
                    owner,
                })
            }
        };

        let path = Self::lock_path(db_path);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        if let Err(e) = file.try_lock_exclusive() {
            let contended = e.kind() == std::io::ErrorKind::WouldBlock
                || e.raw_os_error() == fs2::lock_contended_error().raw_os_error();
            if contended {
                log::warn!("Migration lock {:?} is held by another process", path);
                return Err(AppError::LockContention(db_path.display().to_string()));
            }
            return Err(AppError::Io(format!("Failed to lock {:?}: {}", path, e)));
        }

        // Owner info is informational only; the flock is what excludes.
        file.set_len(0)?;
        writeln!(
            file,
            "{} pid={} since={}",
            owner,
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        log::debug!("Acquired migration lock {:?} as {}", path, owner);

        Ok(Self {
            file: Some(file),
            path: Some(path),
            owner,
        })
    }

    pub fn lock_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".migrate.lock");
        PathBuf::from(name)
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl Drop for MigrationLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = FileExt::unlock(&file) {
                log::warn!("Failed to release migration lock {:?}: {}", self.path, e);
            } else {
                log::debug!("Released migration lock {:?}", self.path);
            }
        }
    }
}
