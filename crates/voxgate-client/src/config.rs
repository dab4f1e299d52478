//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use voxgate_core::paths::ResolvedPaths;
use voxgate_core::{Settings, SpeakError};

/// Slack added to every client-side deadline on top of the daemon's own.
pub const DEFAULT_GRACE: Duration = Duration::from_secs(2);

/// How long a socket connect may take before the daemon counts as unreachable.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// Everything a producer needs to coordinate one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub socket_path: PathBuf,
    pub locks_dir: PathBuf,
    pub event_log: PathBuf,

    /// Skip the daemon and use lock files only.
    pub daemon_disabled: bool,
    /// Never spawn a daemon when none answers.
    pub autostart_disabled: bool,
    /// Explicit daemon binary for auto-start.
    pub daemon_bin: Option<PathBuf>,

    /// `timeoutMs` sent with `waitForGrant`.
    pub grant_timeout: Duration,
    pub grace: Duration,
    pub connect_timeout: Duration,
    pub lock_stale_after: Duration,

    /// Backend tried first when a request names none.
    pub preferred_backend: Option<String>,
}

impl ClientConfig {
    pub fn from_settings(settings: &Settings, paths: &ResolvedPaths) -> Self {
        Self {
            socket_path: paths.socket.clone(),
            locks_dir: paths.locks_dir.clone(),
            event_log: settings
                .log_file
                .clone()
                .unwrap_or_else(|| paths.event_log.clone()),
            daemon_disabled: settings.daemon_disabled,
            autostart_disabled: settings.autostart_disabled,
            daemon_bin: settings.daemon_bin.clone(),
            grant_timeout: settings.grant_timeout(),
            grace: DEFAULT_GRACE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            lock_stale_after: settings.lock_stale_after(),
            preferred_backend: settings.preferred_backend.clone(),
        }
    }

    /// Load settings and paths from the process environment.
    pub fn from_env() -> Result<Self, SpeakError> {
        let settings =
            Settings::from_env().map_err(|e| SpeakError::invalid_request(e.to_string()))?;
        let paths =
            ResolvedPaths::from_env().map_err(|e| SpeakError::invalid_request(e.to_string()))?;
        Ok(Self::from_settings(&settings, &paths))
    }

    /// All paths under `root`, defaults elsewhere. Handy for tests and
    /// sandboxed runs.
    pub fn under(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            socket_path: root.join("voxgate.sock"),
            locks_dir: root.join("locks"),
            event_log: root.join("events.jsonl"),
            daemon_disabled: false,
            autostart_disabled: false,
            daemon_bin: None,
            grant_timeout: Settings::with_defaults().grant_timeout(),
            grace: DEFAULT_GRACE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            lock_stale_after: Settings::with_defaults().lock_stale_after(),
            preferred_backend: None,
        }
    }

    /// Client-side bound on a `waitForGrant` round trip.
    pub fn wait_deadline(&self) -> Duration {
        self.grant_timeout + self.grace
    }
}
