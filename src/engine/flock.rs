//! Exclusive database lock.
//!
//! A `LOCK` file under an advisory `flock` keeps two processes from
//! opening the same database directory. The lock releases when the
//! guard drops (or the process dies); the file itself stays behind.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Create (or open) and exclusively lock `path`. Fails immediately
    /// when another holder exists.
    pub fn lock<P: AsRef<Path>>(path: P) -> io::Result<FileLock> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&path)?;
        Self::try_lock(&file)?;
        Ok(FileLock { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use std::os::unix::io::AsRawFd;
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // Best effort where flock is unavailable; the CURRENT/manifest
        // protocol still keeps readers consistent.
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_then_relock_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("LOCK");
        let lock = FileLock::lock(&path).unwrap();
        assert_eq!(lock.path(), path);
        assert!(path.exists());
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("LOCK");
        {
            let _lock = FileLock::lock(&path).unwrap();
        }
        let _again = FileLock::lock(&path).unwrap();
    }
}
