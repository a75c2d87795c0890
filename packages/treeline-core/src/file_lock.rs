//! Whole-directory exclusive advisory lock held by the writer (C2).

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::DbError;

/// Advisory, non-blocking exclusive lock over a sentinel `LOCK` file.
///
/// Held for the lifetime of a read-write `Db`; never acquired by a
/// read-only one (spec I7).
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Opens (creating if absent) the lock file at `path` and takes a
    /// non-blocking exclusive lock. Another process (or another `Db` in
    /// this one) already holding the lock surfaces as `DbError::LockHeld`,
    /// which spec §7 treats as fatal at startup.
    pub fn lock(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .open(&path)
            .map_err(|e| crate::error::classify_io_error(e, "opening lock file"))?;
        file.try_lock_exclusive().map_err(|e| DbError::LockHeld {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { file, path })
    }

    /// Releases the lock. Also run from `Drop`; calling it explicitly lets
    /// callers observe the unlock error instead of swallowing it.
    pub fn unlock(&self) -> Result<(), DbError> {
        FileExt::unlock(&self.file)
            .map_err(|e| crate::error::classify_io_error(e, "releasing lock file"))
    }

    /// Removes the sentinel file from disk after unlocking. Best-effort:
    /// another process may have already raced to recreate it.
    pub fn destroy(self) -> Result<(), DbError> {
        self.unlock()?;
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(crate::error::classify_io_error(e, "removing lock file")),
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release file lock on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_lock_on_same_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("LOCK");
        let first = FileLock::lock(&lock_path).unwrap();
        let second = FileLock::lock(&lock_path);
        assert!(matches!(second, Err(DbError::LockHeld { .. })));
        drop(first);
        // Released; a subsequent lock should succeed.
        FileLock::lock(&lock_path).unwrap();
    }
}
