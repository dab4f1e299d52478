//! Daemon error types.

use std::io;
use std::path::PathBuf;

use voxgate_core::paths::PathError;

/// Failures that stop the daemon from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    /// Another daemon answers on the socket.
    #[error("A daemon is already listening on {0}")]
    AlreadyRunning(PathBuf),

    /// Failed to bind the socket.
    #[error("Failed to bind {path}: {source}")]
    Bind {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Socket directory could not be prepared.
    #[error(transparent)]
    Paths(#[from] PathError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
