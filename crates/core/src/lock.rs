//! Exclusive repository lock
//!
//! Serializes prune runs (and any other mutating command) across processes.

use crate::error::RepositoryError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const LOCK_FILE: &str = "lock";

/// Held exclusive lock on a repository directory
///
/// The `flock` lives as long as `file` stays open, so dropping the value
/// releases it. Within the holding process, operations that need exclusive
/// access take a [`LockGuard`] through [`RepoLock::claim`].
#[derive(Debug)]
pub struct RepoLock {
    path: PathBuf,
    #[allow(dead_code)]
    file: File,
    claimed: Arc<AtomicBool>,
}

/// Exclusive claim on a locked repository, cleared on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    claimed: Arc<AtomicBool>,
}

/// Lock holder diagnostics written into the lock file
#[derive(Debug, Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    started_at: u64,
}

impl RepoLock {
    /// Acquire the exclusive lock for `repo_dir`
    ///
    /// Fails immediately with `LockUnavailable` if another handle holds it.
    pub fn acquire(repo_dir: &Path) -> crate::Result<Self> {
        let lock_path = repo_dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)?;

        if !try_flock_exclusive(&file)? {
            let holder = match Self::read_lock_content(&mut file) {
                Ok(content) => format!("held by pid {}", content.pid),
                Err(_) => "held by another process".to_string(),
            };
            return Err(RepositoryError::LockUnavailable(format!(
                "{} ({})",
                lock_path.display(),
                holder
            )));
        }

        Self::write_lock_content(&mut file)?;
        tracing::debug!(path = %lock_path.display(), "acquired repository lock");

        Ok(Self {
            path: lock_path,
            file,
            claimed: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Claim exclusive use of the repository within this process
    ///
    /// Fails with `LockUnavailable` while another guard is alive.
    pub fn claim(&self) -> crate::Result<LockGuard> {
        if self
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RepositoryError::LockUnavailable(format!(
                "{} (held by pid {} in this process)",
                self.path.display(),
                std::process::id()
            )));
        }
        tracing::debug!(path = %self.path.display(), "claimed repository lock");
        Ok(LockGuard {
            path: self.path.clone(),
            claimed: Arc::clone(&self.claimed),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_lock_content(file: &mut File) -> crate::Result<()> {
        let content = LockContent {
            pid: std::process::id(),
            started_at: current_timestamp_ms(),
        };
        let serialized = serde_json::to_string(&content)
            .map_err(|e| RepositoryError::Io(std::io::Error::other(e)))?;

        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    fn read_lock_content(file: &mut File) -> crate::Result<LockContent> {
        file.seek(SeekFrom::Start(0))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;
        serde_json::from_str(&contents).map_err(|e| RepositoryError::Io(std::io::Error::other(e)))
    }
}

impl LockGuard {
    /// Release the claim explicitly
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.claimed.store(false, Ordering::Release);
        tracing::debug!(path = %self.path.display(), "released repository lock");
    }
}

/// Try to acquire exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> crate::Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(RepositoryError::Io(e.into())),
    }
}

#[cfg(not(unix))]
fn try_flock_exclusive(_file: &File) -> crate::Result<bool> {
    Ok(true)
}

fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
