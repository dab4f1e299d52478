//! Resolution of every on-disk location voxgate uses.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use super::error::PathError;

/// Overrides the data root (locks, logs).
pub const DATA_DIR_ENV: &str = "VOXGATE_DATA_DIR";
/// Overrides the daemon socket path.
pub const SOCKET_ENV: &str = "VOXGATE_SOCKET";
/// Overrides the event log path.
pub const LOG_FILE_ENV: &str = "VOXGATE_LOG_FILE";

const APP_DIR: &str = "voxgate";
const SOCKET_NAME: &str = "voxgate.sock";

/// All resolved locations for one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub data_root: PathBuf,
    pub socket: PathBuf,
    pub locks_dir: PathBuf,
    pub event_log: PathBuf,
    pub daemon_log: PathBuf,
}

impl ResolvedPaths {
    /// Resolve from the process environment and platform directories.
    pub fn from_env() -> Result<Self, PathError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Resolve from an arbitrary variable lookup.
    ///
    /// Resolution order for the data root:
    /// 1. `VOXGATE_DATA_DIR`
    /// 2. Platform data directory (e.g. `~/.local/share/voxgate`)
    ///
    /// The socket prefers `VOXGATE_SOCKET`, then the per-user runtime
    /// directory, then the data root.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, PathError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let data_root = match override_path(&lookup, DATA_DIR_ENV)? {
            Some(path) => path,
            None => dirs::data_local_dir()
                .ok_or(PathError::NoDataDir)?
                .join(APP_DIR),
        };

        let socket = match override_path(&lookup, SOCKET_ENV)? {
            Some(path) => path,
            None => dirs::runtime_dir().map_or_else(
                || data_root.join(SOCKET_NAME),
                |dir| dir.join(SOCKET_NAME),
            ),
        };

        let event_log = override_path(&lookup, LOG_FILE_ENV)?
            .unwrap_or_else(|| data_root.join("events.jsonl"));

        Ok(Self {
            locks_dir: data_root.join("locks"),
            daemon_log: data_root.join("daemon.log"),
            data_root,
            socket,
            event_log,
        })
    }
}

fn override_path<F>(lookup: &F, key: &'static str) -> Result<Option<PathBuf>, PathError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) if value.trim().is_empty() => Err(PathError::EmptyOverride(key)),
        Some(value) => Ok(Some(PathBuf::from(value))),
        None => Ok(None),
    }
}

/// Root directory for voxgate data.
pub fn data_root() -> Result<PathBuf, PathError> {
    Ok(ResolvedPaths::from_env()?.data_root)
}

/// Unix socket the daemon listens on.
pub fn socket_path() -> Result<PathBuf, PathError> {
    Ok(ResolvedPaths::from_env()?.socket)
}

/// Directory holding fallback lock files.
pub fn locks_dir() -> Result<PathBuf, PathError> {
    Ok(ResolvedPaths::from_env()?.locks_dir)
}

/// Append-only JSONL event log.
pub fn event_log_path() -> Result<PathBuf, PathError> {
    Ok(ResolvedPaths::from_env()?.event_log)
}

/// Log file for a detached daemon.
pub fn daemon_log_path() -> Result<PathBuf, PathError> {
    Ok(ResolvedPaths::from_env()?.daemon_log)
}

/// Create `path` (and parents) if missing; fail if it exists as a file.
pub fn ensure_directory(path: &Path) -> Result<(), PathError> {
    if path.exists() {
        if !path.is_dir() {
            return Err(PathError::NotADirectory(path.to_path_buf()));
        }
        return Ok(());
    }

    fs::create_dir_all(path).map_err(|e| PathError::CreateFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    tracing::debug!(path = %path.display(), "Created directory");
    Ok(())
}
