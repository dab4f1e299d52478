//! Daemon configuration.

use std::path::PathBuf;
use std::time::Duration;

use voxgate_core::Settings;
use voxgate_core::settings::{
    DEFAULT_GRANT_CEILING_MS, DEFAULT_GRANT_SETTLE_MS, DEFAULT_GRANT_TIMEOUT_MS,
    DEFAULT_IDLE_SHUTDOWN_SECS, DEFAULT_QUEUE_CAPACITY,
};

/// Everything the daemon needs to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    /// Unix socket to listen on.
    pub socket_path: PathBuf,
    /// Maximum queued plus granted items.
    pub queue_capacity: usize,
    /// Expiry of queued items nobody waits for.
    pub grant_timeout: Duration,
    /// How long a granted item may stay unreported.
    pub grant_ceiling: Duration,
    /// Delay before the first grant after an idle period.
    pub grant_settle: Duration,
    /// Exit after this long with no connections and an empty queue.
    pub idle_shutdown: Option<Duration>,
}

impl DaemonConfig {
    /// Defaults for the given socket.
    pub const fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            grant_timeout: Duration::from_millis(DEFAULT_GRANT_TIMEOUT_MS),
            grant_ceiling: Duration::from_millis(DEFAULT_GRANT_CEILING_MS),
            grant_settle: Duration::from_millis(DEFAULT_GRANT_SETTLE_MS),
            idle_shutdown: Some(Duration::from_secs(DEFAULT_IDLE_SHUTDOWN_SECS)),
        }
    }

    pub const fn from_settings(settings: &Settings, socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            queue_capacity: settings.queue_capacity,
            grant_timeout: settings.grant_timeout(),
            grant_ceiling: settings.grant_ceiling(),
            grant_settle: settings.grant_settle(),
            idle_shutdown: settings.idle_shutdown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_carry_over() {
        let mut settings = Settings::with_defaults();
        settings.queue_capacity = 3;
        settings.idle_shutdown_secs = 0;
        settings.grant_settle_ms = 0;

        let config = DaemonConfig::from_settings(&settings, PathBuf::from("/tmp/v.sock"));
        assert_eq!(config.queue_capacity, 3);
        assert_eq!(config.idle_shutdown, None);
        assert_eq!(config.grant_settle, Duration::ZERO);
        assert_eq!(config.grant_ceiling, Duration::from_secs(60));
    }

    #[test]
    fn defaults_match_settings_defaults() {
        let socket = PathBuf::from("/tmp/v.sock");
        assert_eq!(
            DaemonConfig::new(socket.clone()),
            DaemonConfig::from_settings(&Settings::with_defaults(), socket)
        );
    }
}
