//! core::ops::lock
//!
//! Exclusive advisory lock on the runner workspace directory, per §4.3.
//!
//! # Storage
//!
//! - `<patch_dir>/am_patch.lock` - lock file with OS-level exclusive lock,
//!   carrying `pid=...\nstarted=<unix_ts>\n` for stale-lock detection.
//!
//! # Conflict policy
//!
//! - `fail`: refuse to proceed if another process holds the lock.
//! - `steal`: if the lock is older than a configured TTL, remove and
//!   re-acquire it.
//!
//! The lock is released on every exit path, including panics, via `Drop`.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use thiserror::Error;

/// How to handle an already-held lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockConflictPolicy {
    /// Refuse to proceed.
    Fail,
    /// Steal the lock if it is older than the given TTL.
    Steal { ttl: Duration },
}

/// Errors from locking operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("another process holds the lock (pid={pid:?}, started={started:?})")]
    AlreadyLocked {
        pid: Option<u32>,
        started: Option<u64>,
    },

    #[error("failed to create lock file at {path}: {source}")]
    CreateFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to acquire lock at {path}: {source}")]
    AcquireFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("i/o error on lock file: {0}")]
    Io(#[from] std::io::Error),
}

/// An exclusive lock on the runner's patch directory.
///
/// Released automatically when dropped (RAII), so every exit path - success,
/// early return, or panic unwind - releases it.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: Option<File>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn read_lock_metadata(path: &Path) -> (Option<u32>, Option<u64>) {
    let mut pid = None;
    let mut started = None;
    if let Ok(mut f) = File::open(path) {
        let mut buf = String::new();
        if f.read_to_string(&mut buf).is_ok() {
            for line in buf.lines() {
                if let Some(v) = line.strip_prefix("pid=") {
                    pid = v.trim().parse().ok();
                } else if let Some(v) = line.strip_prefix("started=") {
                    started = v.trim().parse().ok();
                }
            }
        }
    }
    (pid, started)
}

impl RunLock {
    /// Attempt to acquire the run lock at `lock_path`, honoring `policy`
    /// on conflict.
    pub fn acquire(lock_path: &Path, policy: LockConflictPolicy) -> Result<Self, LockError> {
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent).map_err(|e| LockError::CreateFailed {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(lock_path)
            .map_err(|e| LockError::CreateFailed {
                path: lock_path.to_path_buf(),
                source: e,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(_) => {
                let (pid, started) = read_lock_metadata(lock_path);
                match policy {
                    LockConflictPolicy::Fail => {
                        return Err(LockError::AlreadyLocked { pid, started });
                    }
                    LockConflictPolicy::Steal { ttl } => {
                        let stale = started
                            .map(|s| now_unix().saturating_sub(s) >= ttl.as_secs())
                            .unwrap_or(false);
                        if !stale {
                            return Err(LockError::AlreadyLocked { pid, started });
                        }
                        // Best-effort steal: drop the stale file and re-create.
                        drop(file);
                        let _ = fs::remove_file(lock_path);
                        let fresh = OpenOptions::new()
                            .create(true)
                            .read(true)
                            .write(true)
                            .open(lock_path)
                            .map_err(|e| LockError::CreateFailed {
                                path: lock_path.to_path_buf(),
                                source: e,
                            })?;
                        fresh
                            .try_lock_exclusive()
                            .map_err(|e| LockError::AcquireFailed {
                                path: lock_path.to_path_buf(),
                                source: e,
                            })?;
                        return Self::finish_acquire(lock_path, fresh);
                    }
                }
            }
        }

        Self::finish_acquire(lock_path, file)
    }

    fn finish_acquire(path: &Path, mut file: File) -> Result<Self, LockError> {
        use std::io::{Seek, SeekFrom};
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        writeln!(file, "pid={}", std::process::id())?;
        writeln!(file, "started={}", now_unix())?;
        file.flush()?;
        Ok(RunLock {
            path: path.to_path_buf(),
            file: Some(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = fs2::FileExt::unlock(&file);
        }
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn acquire_and_release() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("am_patch.lock");
        let lock = RunLock::acquire(&lock_path, LockConflictPolicy::Fail).unwrap();
        assert!(lock_path.exists());
        drop(lock);
        assert!(!lock_path.exists());
    }

    #[test]
    fn conflicting_fail_policy_errors() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("am_patch.lock");
        let _held = RunLock::acquire(&lock_path, LockConflictPolicy::Fail).unwrap();
        let second = RunLock::acquire(&lock_path, LockConflictPolicy::Fail);
        assert!(matches!(second, Err(LockError::AlreadyLocked { .. })));
    }

    #[test]
    fn steal_after_ttl_succeeds() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("am_patch.lock");
        fs::write(&lock_path, "pid=1\nstarted=0\n").unwrap();
        let held = RunLock::acquire(
            &lock_path,
            LockConflictPolicy::Steal {
                ttl: Duration::from_secs(0),
            },
        );
        assert!(held.is_ok());
    }
}
