//! Cross-process advisory locks for file-backed tenant databases.
//!
//! Two kinds of lock live next to a tenant database file:
//!
//! - `<lock id>.lock` serializes first-time creation. [`with_file_lock`]
//!   holds it for the duration of a closure.
//! - `<database>.ready-lock` is held by whoever is still populating a freshly
//!   created database. [`ReadyMarker::is_held`] lets other processes tell a
//!   database that exists from one that is ready.
//!
//! Both use the operating system's advisory file locks (`flock` on Unix),
//! so they exclude other processes as well as other threads. Locks are tied to
//! a [`FileLockGuard`] and released when it is dropped, including while
//! unwinding from a panic.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BackendError, TenancyResult};

/// Suffix of creation lock files.
pub const LOCK_SUFFIX: &str = ".lock";
/// Suffix of ready marker files.
pub const READY_SUFFIX: &str = ".ready-lock";

/// Appends `suffix` to the final component of `path`.
fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Returns the lock file used for `lock_id`.
pub fn lock_file_path(lock_id: impl AsRef<Path>) -> PathBuf {
    with_suffix(lock_id.as_ref(), LOCK_SUFFIX)
}

fn open_lock_file(path: &Path) -> Result<File, BackendError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| BackendError::io(parent, e))?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|e| BackendError::io(path, e))
}

/// An exclusive advisory lock held on a lock file.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
}

impl FileLockGuard {
    fn exclusive(path: PathBuf) -> Result<Self, BackendError> {
        let file = open_lock_file(&path)?;
        file.lock().map_err(|e| BackendError::io(&path, e))?;
        debug!(lock = %path.display(), "Acquired file lock");
        Ok(Self { file, path })
    }

    /// The lock file this guard holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        match self.file.unlock() {
            Ok(()) => debug!(lock = %self.path.display(), "Released file lock"),
            // Closing the descriptor below releases the lock regardless.
            Err(e) => warn!(lock = %self.path.display(), error = %e, "Failed to unlock file lock"),
        }
    }
}

/// Blocking exclusive lock keyed by a path-like lock identifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileLock;

impl FileLock {
    /// Blocks until the lock for `lock_id` is free, then takes it.
    ///
    /// The lock file is `<lock_id>.lock`; its directory is created if needed.
    pub fn acquire(lock_id: impl AsRef<Path>) -> Result<FileLockGuard, BackendError> {
        FileLockGuard::exclusive(lock_file_path(lock_id))
    }
}

/// Runs `block` while holding the lock for `lock_id`.
///
/// The lock is released on every exit path: normal return, error, or panic.
pub fn with_file_lock<T, F>(lock_id: impl AsRef<Path>, block: F) -> TenancyResult<T>
where
    F: FnOnce() -> TenancyResult<T>,
{
    let _guard = FileLock::acquire(lock_id)?;
    block()
}

/// Marker meaning "this database exists but is still being populated".
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyMarker;

impl ReadyMarker {
    /// Returns the marker file for the database at `database`.
    pub fn path_for(database: impl AsRef<Path>) -> PathBuf {
        with_suffix(database.as_ref(), READY_SUFFIX)
    }

    /// Holds the marker until the returned guard is dropped.
    pub fn hold(database: impl AsRef<Path>) -> Result<FileLockGuard, BackendError> {
        FileLockGuard::exclusive(Self::path_for(database))
    }

    /// Returns `true` if another holder currently has the marker.
    ///
    /// Never blocks. A missing marker file means nobody holds it.
    pub fn is_held(database: impl AsRef<Path>) -> Result<bool, BackendError> {
        let path = Self::path_for(database);
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(BackendError::io(&path, e)),
        };
        match file.try_lock_shared() {
            Ok(()) => {
                file.unlock().map_err(|e| BackendError::io(&path, e))?;
                Ok(false)
            }
            Err(TryLockError::WouldBlock) => Ok(true),
            Err(TryLockError::Error(e)) => Err(BackendError::io(&path, e)),
        }
    }
}
