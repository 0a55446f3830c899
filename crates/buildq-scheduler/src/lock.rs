//! PID lock file guarding a queue directory.
//!
//! The lock file holds the decimal pid of its owner followed by a newline.
//! A lock whose owner is no longer running is stale and gets replaced.
//!
//! The marker is written to a temporary file and linked into place with a
//! no-clobber rename, so it never appears without its pid. Inspecting and
//! replacing an existing marker happens under an exclusive `flock` on the
//! containing directory.

use std::fs::{self, File};
use std::io::{self, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// How many times acquisition retries after clearing a stale lock.
const MAX_ATTEMPTS: usize = 3;

/// Errors from lock acquisition.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not acquire {path} after {attempts} attempts")]
    Contended { path: PathBuf, attempts: usize },
}

impl LockError {
    fn io(path: &Path, source: io::Error) -> Self {
        LockError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// An acquired lock. The lock file is removed when the guard is released or
/// dropped.
#[derive(Debug)]
pub struct QueueLock {
    path: PathBuf,
    pid: u32,
    held: bool,
}

impl QueueLock {
    /// Try to take the lock at `path`.
    ///
    /// Returns `Ok(None)` when a live process already holds it.
    pub fn acquire(path: impl AsRef<Path>) -> Result<Option<QueueLock>, LockError> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let pid = std::process::id();

        let _dir_lock = DirLock::exclusive(dir).map_err(|e| LockError::io(dir, e))?;
        let mut marker = write_marker(dir, pid).map_err(|e| LockError::io(path, e))?;

        for attempt in 1..=MAX_ATTEMPTS {
            match marker.persist_noclobber(path) {
                Ok(_) => {
                    debug!(path = %path.display(), pid, "Acquired queue lock");
                    return Ok(Some(QueueLock {
                        path: path.to_path_buf(),
                        pid,
                        held: true,
                    }));
                }
                Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => marker = e.file,
                Err(e) => return Err(LockError::io(path, e.error)),
            }

            match holder(path) {
                Ok(Some(owner)) if is_pid_alive(owner) => {
                    debug!(path = %path.display(), owner, "Queue lock held by live process");
                    return Ok(None);
                }
                Ok(owner) => {
                    debug!(path = %path.display(), ?owner, attempt, "Removing stale queue lock");
                    match fs::remove_file(path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(LockError::io(path, e)),
                    }
                }
                // Released since our persist attempt: just retry.
                Err(LockError::Io { source, .. }) if source.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        Err(LockError::Contended {
            path: path.to_path_buf(),
            attempts: MAX_ATTEMPTS,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file now instead of on drop.
    pub fn release(mut self) -> Result<(), LockError> {
        self.held = false;
        fs::remove_file(&self.path).map_err(|e| LockError::io(&self.path, e))
    }
}

impl Drop for QueueLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove queue lock");
        }
    }
}

/// Write `"<pid>\n"` to a fresh temporary file in `dir`.
fn write_marker(dir: &Path, pid: u32) -> io::Result<tempfile::NamedTempFile> {
    let mut marker = tempfile::Builder::new().prefix(".tmp").tempfile_in(dir)?;
    writeln!(marker, "{}", pid)?;
    marker.as_file().sync_all()?;
    marker
        .as_file()
        .set_permissions(fs::Permissions::from_mode(0o664))?;
    Ok(marker)
}

/// Exclusive `flock` on a directory, released when dropped.
struct DirLock {
    _dir: File,
}

impl DirLock {
    fn exclusive(dir: &Path) -> io::Result<Self> {
        let file = File::open(dir)?;
        loop {
            // SAFETY: the descriptor stays open for the lifetime of `file`.
            if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) } == 0 {
                return Ok(Self { _dir: file });
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

/// Read the pid stored in a lock file.
///
/// Returns `Ok(None)` for an empty or unparseable file.
pub fn holder(path: impl AsRef<Path>) -> Result<Option<u32>, LockError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path).map_err(|e| LockError::io(path, e))?;
    Ok(content.trim().parse().ok())
}

/// Whether a process with this pid exists.
///
/// `kill(pid, 0)` failing with EPERM still means the process exists.
pub fn is_pid_alive(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs the existence and permission checks only.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}
