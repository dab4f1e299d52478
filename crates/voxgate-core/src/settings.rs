//! Settings domain types and validation.
//!
//! All runtime knobs come from `VOXGATE_*` environment variables. Loading
//! goes through a lookup function so the same parser serves the real
//! environment and tests.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default time a producer waits for its turn.
pub const DEFAULT_GRANT_TIMEOUT_MS: u64 = 30_000;

/// Default time a granted turn may stay unreported before the daemon reclaims it.
pub const DEFAULT_GRANT_CEILING_MS: u64 = 60_000;

/// Default age after which a fallback lock is stale.
pub const DEFAULT_LOCK_STALE_SECS: u64 = 30;

/// Default time the first request after an idle period waits before it is
/// granted, so near-simultaneous requests are ordered by priority.
pub const DEFAULT_GRANT_SETTLE_MS: u64 = 50;

/// Default maximum number of queued plus active items.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default idle period after which the daemon exits (0 disables).
pub const DEFAULT_IDLE_SHUTDOWN_SECS: u64 = 600;

/// Default environment variable holding the HTTP backend's API key.
pub const DEFAULT_HTTP_KEY_ENV: &str = "VOXGATE_HTTP_TTS_KEY";

/// Runtime settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Skip the daemon entirely and coordinate through lock files only.
    pub daemon_disabled: bool,

    /// Debug-level logging.
    pub debug: bool,

    /// Event log override (`VOXGATE_LOG_FILE`).
    pub log_file: Option<PathBuf>,

    pub grant_timeout_ms: u64,
    pub grant_ceiling_ms: u64,
    pub grant_settle_ms: u64,
    pub lock_stale_secs: u64,
    pub queue_capacity: usize,
    pub idle_shutdown_secs: u64,

    /// Backend tried first when a request names none.
    pub preferred_backend: Option<String>,

    /// JSON-in/WAV-out synthesis endpoint.
    pub http_tts_url: Option<String>,

    /// Name of the variable that holds the HTTP endpoint's API key.
    pub http_tts_key_env: String,

    /// Piper voice model; enables the piper backend when set.
    pub piper_model: Option<PathBuf>,

    /// Recognizer command line (e.g. a whisper.cpp CLI).
    pub stt_command: Option<String>,

    /// Binary spawned to auto-start the daemon.
    pub daemon_bin: Option<PathBuf>,

    /// Disable daemon auto-start.
    pub autostart_disabled: bool,
}

impl Settings {
    /// Create settings with sensible defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            daemon_disabled: false,
            debug: false,
            log_file: None,
            grant_timeout_ms: DEFAULT_GRANT_TIMEOUT_MS,
            grant_ceiling_ms: DEFAULT_GRANT_CEILING_MS,
            grant_settle_ms: DEFAULT_GRANT_SETTLE_MS,
            lock_stale_secs: DEFAULT_LOCK_STALE_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            idle_shutdown_secs: DEFAULT_IDLE_SHUTDOWN_SECS,
            preferred_backend: None,
            http_tts_url: None,
            http_tts_key_env: DEFAULT_HTTP_KEY_ENV.to_string(),
            piper_model: None,
            stt_command: None,
            daemon_bin: None,
            autostart_disabled: false,
        }
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary lookup, then validate.
    ///
    /// Unset and empty variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::with_defaults();

        if let Some(v) = get("VOXGATE_DISABLE_DAEMON") {
            settings.daemon_disabled = parse_bool("VOXGATE_DISABLE_DAEMON", &v)?;
        }
        if let Some(v) = get("VOXGATE_DEBUG") {
            settings.debug = parse_bool("VOXGATE_DEBUG", &v)?;
        }
        if let Some(v) = get("VOXGATE_NO_AUTOSTART") {
            settings.autostart_disabled = parse_bool("VOXGATE_NO_AUTOSTART", &v)?;
        }
        if let Some(v) = get("VOXGATE_GRANT_TIMEOUT_MS") {
            settings.grant_timeout_ms = parse_number("VOXGATE_GRANT_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("VOXGATE_GRANT_CEILING_MS") {
            settings.grant_ceiling_ms = parse_number("VOXGATE_GRANT_CEILING_MS", &v)?;
        }
        if let Some(v) = get("VOXGATE_GRANT_SETTLE_MS") {
            settings.grant_settle_ms = parse_number("VOXGATE_GRANT_SETTLE_MS", &v)?;
        }
        if let Some(v) = get("VOXGATE_LOCK_STALE_SECS") {
            settings.lock_stale_secs = parse_number("VOXGATE_LOCK_STALE_SECS", &v)?;
        }
        if let Some(v) = get("VOXGATE_QUEUE_CAPACITY") {
            settings.queue_capacity = parse_number("VOXGATE_QUEUE_CAPACITY", &v)?;
        }
        if let Some(v) = get("VOXGATE_IDLE_SHUTDOWN_SECS") {
            settings.idle_shutdown_secs = parse_number("VOXGATE_IDLE_SHUTDOWN_SECS", &v)?;
        }

        settings.log_file = get("VOXGATE_LOG_FILE").map(PathBuf::from);
        settings.preferred_backend = get("VOXGATE_BACKEND");
        settings.http_tts_url = get("VOXGATE_HTTP_TTS_URL");
        if let Some(v) = get("VOXGATE_HTTP_TTS_KEY_ENV") {
            settings.http_tts_key_env = v;
        }
        settings.piper_model = get("VOXGATE_PIPER_MODEL").map(PathBuf::from);
        settings.stt_command = get("VOXGATE_STT_COMMAND");
        settings.daemon_bin = get("VOXGATE_DAEMON_BIN").map(PathBuf::from);

        validate_settings(&settings)?;
        Ok(settings)
    }

    pub const fn grant_timeout(&self) -> Duration {
        Duration::from_millis(self.grant_timeout_ms)
    }

    pub const fn grant_ceiling(&self) -> Duration {
        Duration::from_millis(self.grant_ceiling_ms)
    }

    pub const fn grant_settle(&self) -> Duration {
        Duration::from_millis(self.grant_settle_ms)
    }

    pub const fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    /// `None` when idle shutdown is disabled.
    pub const fn idle_shutdown(&self) -> Option<Duration> {
        if self.idle_shutdown_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_shutdown_secs))
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Settings validation error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    #[error("{key} must be a boolean (true/false/1/0), got '{value}'")]
    InvalidBool { key: &'static str, value: String },

    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },

    #[error("Grant timeout must be between 100 and 600,000 ms, got {0}")]
    InvalidGrantTimeout(u64),

    #[error("Grant ceiling must be at least 1,000 ms, got {0}")]
    InvalidGrantCeiling(u64),

    #[error("Grant settle window must be at most 1,000 ms, got {0}")]
    InvalidGrantSettle(u64),

    #[error("Lock staleness must be at least 1 second")]
    InvalidLockStale,

    #[error("Queue capacity must be between 1 and 1024, got {0}")]
    InvalidQueueCapacity(usize),
}

/// Validate settings values.
pub fn validate_settings(settings: &Settings) -> Result<(), SettingsError> {
    if !(100..=600_000).contains(&settings.grant_timeout_ms) {
        return Err(SettingsError::InvalidGrantTimeout(settings.grant_timeout_ms));
    }
    if settings.grant_ceiling_ms < 1_000 {
        return Err(SettingsError::InvalidGrantCeiling(settings.grant_ceiling_ms));
    }
    if settings.grant_settle_ms > 1_000 {
        return Err(SettingsError::InvalidGrantSettle(settings.grant_settle_ms));
    }
    if settings.lock_stale_secs == 0 {
        return Err(SettingsError::InvalidLockStale);
    }
    if !(1..=1024).contains(&settings.queue_capacity) {
        return Err(SettingsError::InvalidQueueCapacity(settings.queue_capacity));
    }
    Ok(())
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, SettingsError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(SettingsError::InvalidBool {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, SettingsError> {
    value
        .trim()
        .parse()
        .map_err(|_| SettingsError::InvalidNumber {
            key,
            value: value.to_string(),
        })
}
