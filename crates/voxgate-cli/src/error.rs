//! CLI error type and exit codes.

use thiserror::Error;
use voxgate_client::LockError;
use voxgate_core::paths::PathError;
use voxgate_core::{SettingsError, SpeakError};
use voxgate_daemon::DaemonError;
use voxgate_voice::{AudioError, BackendError};

#[derive(Debug, Error)]
pub enum CliError {
    /// Anything not covered below.
    #[error("{0}")]
    General(String),

    /// Bad command-line input.
    #[error("Invalid arguments: {0}")]
    Arguments(String),

    /// Invalid `VOXGATE_*` settings or unresolvable paths.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(String),

    /// Nothing answers on the daemon socket.
    #[error("Daemon is not running ({0})")]
    DaemonNotRunning(String),

    /// `voxgate daemon` found another live daemon.
    #[error("{0}")]
    AlreadyRunning(String),

    /// Audio device or backend failure.
    #[error("Audio error: {0}")]
    Audio(String),
}

impl CliError {
    /// Exit code, following `sysexits.h` where a category fits.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::General(_) => 1,
            Self::Arguments(_) => 2,             // EX_USAGE
            Self::DaemonNotRunning(_) => 69,     // EX_UNAVAILABLE
            Self::Audio(_) => 70,                // EX_SOFTWARE
            Self::Io(_) => 74,                   // EX_IOERR
            Self::AlreadyRunning(_) => 75,       // EX_TEMPFAIL
            Self::Config(_) => 78,               // EX_CONFIG
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<SettingsError> for CliError {
    fn from(err: SettingsError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<PathError> for CliError {
    fn from(err: PathError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<DaemonError> for CliError {
    fn from(err: DaemonError) -> Self {
        match err {
            DaemonError::AlreadyRunning(_) => Self::AlreadyRunning(err.to_string()),
            DaemonError::Paths(e) => e.into(),
            other => Self::Io(other.to_string()),
        }
    }
}

impl From<SpeakError> for CliError {
    fn from(err: SpeakError) -> Self {
        match err {
            SpeakError::DaemonUnreachable(msg) => Self::DaemonNotRunning(msg),
            SpeakError::InvalidRequest(msg) => Self::Arguments(msg),
            other => Self::General(other.to_string()),
        }
    }
}

impl From<LockError> for CliError {
    fn from(err: LockError) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<AudioError> for CliError {
    fn from(err: AudioError) -> Self {
        Self::Audio(err.to_string())
    }
}

impl From<BackendError> for CliError {
    fn from(err: BackendError) -> Self {
        Self::Audio(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unreachable_daemon_is_unavailable() {
        let err: CliError = SpeakError::unreachable("no socket").into();
        assert_eq!(err.exit_code(), 69);
    }

    #[test]
    fn second_daemon_is_a_temporary_failure() {
        let err: CliError = DaemonError::AlreadyRunning(PathBuf::from("/tmp/v.sock")).into();
        assert!(matches!(err, CliError::AlreadyRunning(_)));
        assert_eq!(err.exit_code(), 75);
    }

    #[test]
    fn settings_errors_are_config_errors() {
        let err: CliError = SettingsError::InvalidLockStale.into();
        assert_eq!(err.exit_code(), 78);
    }
}
