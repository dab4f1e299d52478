//! Fallback speaker locks.
//!
//! Used only when the daemon cannot be reached. One file per
//! `(session, event kind, agent)` in the locks directory; creating it with
//! `O_EXCL` is the acquisition. Contents:
//!
//! ```json
//! {"token":"<uuid>","pid":4242,"createdMs":1760000000000}
//! ```
//!
//! # Staleness
//! - Older than the stale period (30 s by default)
//! - Holder pid no longer exists
//! - Unparsable content counts as live (a holder may be mid-write) until the
//!   file's mtime passes the stale period
//!
//! Stale files are reclaimed by the next acquirer. Judging and removing a
//! stale file happens under a non-blocking `flock` on `.reclaim` in the same
//! directory, so two reclaimers never both remove (one of them a fresh
//! lock). The guard removes its file on drop, under the same `flock`, but
//! only while the file still carries its own token.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voxgate_core::{LockKey, SpeakError};

/// Serializes reclaim and release inside one locks directory.
const RECLAIM_FILE: &str = ".reclaim";

/// Lock manager errors.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A live lock already covers this event.
    #[error("{0} is held by another producer")]
    Held(LockKey),

    #[error("Lock I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl From<LockError> for SpeakError {
    fn from(err: LockError) -> Self {
        Self::LockContention(err.to_string())
    }
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> LockError + '_ {
    move |source| LockError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockContent {
    token: Uuid,
    pid: u32,
    created_ms: i64,
}

/// A lock file as seen by [`LockManager::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub path: PathBuf,
    /// Holder pid, when the file could be parsed.
    pub pid: Option<u32>,
    pub age: Duration,
    pub stale: bool,
}

/// Creates, inspects and reclaims lock files in one directory.
#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
    stale_after: Duration,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>, stale_after: Duration) -> Self {
        Self {
            dir: dir.into(),
            stale_after,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Take the lock for `key` without blocking.
    ///
    /// A stale holder is reclaimed and acquisition retried once; a live one
    /// yields [`LockError::Held`].
    pub fn try_acquire(&self, key: &LockKey) -> Result<LockGuard, LockError> {
        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;
        let path = self.dir.join(key.file_name());

        for attempt in 0..2 {
            match create_lock_file(&path) {
                Ok(token) => {
                    debug!(%key, path = %path.display(), "Acquired speaker lock");
                    return Ok(LockGuard { path, token });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    if attempt == 0 && self.reclaim_if_stale(&path)? {
                        continue;
                    }
                    return Err(LockError::Held(key.clone()));
                }
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        Err(LockError::Held(key.clone()))
    }

    /// Every lock file with its age and staleness.
    pub fn list(&self) -> Result<Vec<LockEntry>, LockError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.dir)(e)),
        };

        let mut locks = Vec::new();
        for entry in entries {
            let path = entry.map_err(io_err(&self.dir))?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("lock") {
                continue;
            }
            // Released between read_dir and now.
            let Some(inspection) = self.inspect(&path) else {
                continue;
            };
            locks.push(LockEntry {
                pid: inspection.content.as_ref().map(|c| c.pid),
                age: inspection.age,
                stale: inspection.stale,
                path,
            });
        }
        locks.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(locks)
    }

    /// Remove every stale lock. Returns how many were removed.
    pub fn sweep(&self) -> Result<usize, LockError> {
        let mut removed = 0;
        for entry in self.list()? {
            if entry.stale && self.reclaim_if_stale(&entry.path)? {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, dir = %self.dir.display(), "Swept stale speaker locks");
        }
        Ok(removed)
    }

    /// Remove `path` if its holder is stale. `true` when the path is free.
    ///
    /// Gives up (`false`) when another process is reclaiming in this
    /// directory right now.
    fn reclaim_if_stale(&self, path: &Path) -> Result<bool, LockError> {
        let Some(_reclaiming) = ReclaimLock::take(&self.dir, false)? else {
            debug!(path = %path.display(), "Another producer is reclaiming");
            return Ok(false);
        };

        let Some(inspection) = self.inspect(path) else {
            return Ok(true);
        };
        if !inspection.stale {
            return Ok(false);
        }

        match fs::remove_file(path) {
            Ok(()) => {
                warn!(
                    path = %path.display(),
                    pid = ?inspection.content.as_ref().map(|c| c.pid),
                    age_ms = u64::try_from(inspection.age.as_millis()).unwrap_or(u64::MAX),
                    "Reclaimed stale speaker lock"
                );
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
            Err(e) => Err(io_err(path)(e)),
        }
    }

    /// `None` if the file is gone.
    fn inspect(&self, path: &Path) -> Option<Inspection> {
        let raw = fs::read_to_string(path).ok()?;
        let content: Option<LockContent> = serde_json::from_str(raw.trim()).ok();

        let age = if let Some(c) = &content {
            let age_ms = Utc::now().timestamp_millis().saturating_sub(c.created_ms);
            Duration::from_millis(u64::try_from(age_ms).unwrap_or(0))
        } else {
            fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
                .unwrap_or_default()
        };

        let holder_gone = content.as_ref().is_some_and(|c| !pid_alive(c.pid));
        Some(Inspection {
            stale: age >= self.stale_after || holder_gone,
            content,
            age,
        })
    }
}

struct Inspection {
    content: Option<LockContent>,
    age: Duration,
    stale: bool,
}

/// Exclusive `flock` on the directory's `.reclaim` file, released on drop.
struct ReclaimLock {
    #[cfg(unix)]
    _flock: nix::fcntl::Flock<fs::File>,
}

impl ReclaimLock {
    /// `Ok(None)` when `wait` is false and someone else holds it.
    fn take(dir: &Path, wait: bool) -> Result<Option<Self>, LockError> {
        let path = dir.join(RECLAIM_FILE);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(io_err(&path))?;
        Self::flock(file, wait).map_err(io_err(&path))
    }

    #[cfg(unix)]
    fn flock(file: fs::File, wait: bool) -> io::Result<Option<Self>> {
        use nix::errno::Errno;
        use nix::fcntl::{Flock, FlockArg};

        let arg = if wait {
            FlockArg::LockExclusive
        } else {
            FlockArg::LockExclusiveNonblock
        };
        match Flock::lock(file, arg) {
            Ok(flock) => Ok(Some(Self { _flock: flock })),
            Err((_, errno)) if errno == Errno::EWOULDBLOCK => Ok(None),
            Err((_, errno)) => Err(io::Error::from(errno)),
        }
    }

    #[cfg(not(unix))]
    #[allow(clippy::unnecessary_wraps)]
    fn flock(_file: fs::File, _wait: bool) -> io::Result<Option<Self>> {
        Ok(Some(Self {}))
    }
}

fn create_lock_file(path: &Path) -> io::Result<Uuid> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let content = LockContent {
        token: Uuid::new_v4(),
        pid: std::process::id(),
        created_ms: Utc::now().timestamp_millis(),
    };
    let json = serde_json::to_string(&content).map_err(io::Error::other)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(content.token)
}

/// Whether `pid` names a running process.
#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw == 0 {
        return false;
    }
    // Signal `None` only checks that the process could be signalled.
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => true,
    }
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    true
}

/// Holds a speaker lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: Uuid,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // A reclaimer must never remove a file created after our release.
        let _releasing = self
            .path
            .parent()
            .and_then(|dir| ReclaimLock::take(dir, true).ok().flatten());
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|raw| serde_json::from_str::<LockContent>(raw.trim()).ok())
            .is_some_and(|c| c.token == self.token);
        if !ours {
            debug!(path = %self.path.display(), "Lock was reclaimed by someone else");
            return;
        }
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release speaker lock");
        }
    }
}
