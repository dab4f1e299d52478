//! Error taxonomy for the speak path.
//!
//! Every failure a producer can observe collapses into one [`SpeakError`]
//! variant. None of them is fatal: the producer's response to any of them is
//! to stay silent this time. Subsystem errors (audio, backends, locks, the
//! wire protocol) convert into this type at crate boundaries.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Wire name of a [`SpeakError`] variant, carried in `error` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidRequest,
    Timeout,
    DaemonUnreachable,
    DeviceUnavailable,
    NoBackendAvailable,
    SynthesisFailure,
    PlaybackFailure,
    LockContention,
}

/// Reasons a speak request did not result in audio.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SpeakError {
    /// Malformed request (empty text, unknown priority, unknown item).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The grant did not arrive before the wait deadline.
    #[error("Timed out after {0} ms waiting for a turn")]
    Timeout(u64),

    /// Could not connect to (or auto-start) the coordination daemon.
    #[error("Coordination daemon unreachable: {0}")]
    DaemonUnreachable(String),

    /// No usable audio device.
    #[error("Audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Every registered synthesis backend failed its availability check.
    #[error("No speech backend available")]
    NoBackendAvailable,

    /// The selected backend failed to produce audio.
    #[error("Speech synthesis failed: {0}")]
    SynthesisFailure(String),

    /// Playback failed beyond the recoverable under/overrun threshold.
    #[error("Playback failed: {0}")]
    PlaybackFailure(String),

    /// A live fallback lock already covers this event.
    #[error("Speaker lock held: {0}")]
    LockContention(String),
}

impl SpeakError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        Self::DaemonUnreachable(msg.into())
    }

    /// Wire kind for this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::DaemonUnreachable(_) => ErrorKind::DaemonUnreachable,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::NoBackendAvailable => ErrorKind::NoBackendAvailable,
            Self::SynthesisFailure(_) => ErrorKind::SynthesisFailure,
            Self::PlaybackFailure(_) => ErrorKind::PlaybackFailure,
            Self::LockContention(_) => ErrorKind::LockContention,
        }
    }

    /// Rebuild an error from an `error` reply.
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::InvalidRequest => Self::InvalidRequest(message),
            ErrorKind::Timeout => Self::Timeout(message.parse().unwrap_or_default()),
            ErrorKind::DaemonUnreachable => Self::DaemonUnreachable(message),
            ErrorKind::DeviceUnavailable => Self::DeviceUnavailable(message),
            ErrorKind::NoBackendAvailable => Self::NoBackendAvailable,
            ErrorKind::SynthesisFailure => Self::SynthesisFailure(message),
            ErrorKind::PlaybackFailure => Self::PlaybackFailure(message),
            ErrorKind::LockContention => Self::LockContention(message),
        }
    }

    /// Whether the caller should try the lock-file path instead of skipping.
    ///
    /// Only a lost daemon qualifies; every other error means the turn was
    /// decided and speaking again elsewhere would break ordering.
    pub const fn falls_back_to_lock(&self) -> bool {
        matches!(self, Self::DaemonUnreachable(_))
    }

    /// Whether this outcome is expected noise rather than a failure worth a warning.
    pub const fn is_silent_skip(&self) -> bool {
        matches!(self, Self::LockContention(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_wire_form() {
        let errors = [
            SpeakError::invalid_request("empty text"),
            SpeakError::DeviceUnavailable("no output".into()),
            SpeakError::NoBackendAvailable,
            SpeakError::LockContention("main/stop".into()),
        ];
        for err in errors {
            let rebuilt = SpeakError::from_wire(err.kind(), wire_message(&err));
            assert_eq!(rebuilt, err);
        }
    }

    #[test]
    fn error_kind_uses_camel_case() {
        let json = serde_json::to_string(&ErrorKind::NoBackendAvailable).unwrap();
        assert_eq!(json, "\"noBackendAvailable\"");
    }

    #[test]
    fn only_unreachable_daemon_falls_back() {
        assert!(SpeakError::unreachable("refused").falls_back_to_lock());
        assert!(!SpeakError::Timeout(30_000).falls_back_to_lock());
        assert!(!SpeakError::NoBackendAvailable.falls_back_to_lock());
    }

    fn wire_message(err: &SpeakError) -> String {
        match err {
            SpeakError::InvalidRequest(m)
            | SpeakError::DaemonUnreachable(m)
            | SpeakError::DeviceUnavailable(m)
            | SpeakError::SynthesisFailure(m)
            | SpeakError::PlaybackFailure(m)
            | SpeakError::LockContention(m) => m.clone(),
            SpeakError::Timeout(ms) => ms.to_string(),
            SpeakError::NoBackendAvailable => String::new(),
        }
    }
}
