//! Advisory lock preventing concurrent shotkit invocations.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another shotkit invocation holds {0}")]
    Busy(PathBuf),

    #[error("lock I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Exclusive `flock` held for the lifetime of the value.
#[derive(Debug)]
pub struct InvocationLock {
    file: std::fs::File,
    path: PathBuf,
}

impl InvocationLock {
    /// Try to take the lock without blocking.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        let io_err = |source| LockError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(io_err)?;

        match try_exclusive(&file) {
            Ok(true) => {}
            Ok(false) => return Err(LockError::Busy(path.to_path_buf())),
            Err(e) => return Err(io_err(e)),
        }

        // Holder's pid, for humans inspecting a stuck lock. Truncation only
        // happens once the lock is ours.
        file.set_len(0).map_err(io_err)?;
        let _ = write!(file, "{}", std::process::id());

        debug!(path = %path.display(), "lock acquired");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Non-blocking exclusive `flock`; `Ok(false)` when someone else holds it.
#[cfg(unix)]
fn try_exclusive(file: &std::fs::File) -> std::io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(true);
    }
    let err = std::io::Error::last_os_error();
    if err.kind() == std::io::ErrorKind::WouldBlock {
        Ok(false)
    } else {
        Err(err)
    }
}

#[cfg(not(unix))]
fn try_exclusive(_file: &std::fs::File) -> std::io::Result<bool> {
    Ok(true)
}

impl Drop for InvocationLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        // The lock file stays on disk: unlinking it would let a waiter lock a
        // deleted inode while a newcomer locks a fresh file.
    }
}
