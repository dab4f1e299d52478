//! Per-stream lifecycle.
//!
//! ```text
//! idle ──► prebuffering ──► running ◄──► paused
//!                              │            │
//!                              ▼            │
//!                          draining ──► stopped ◄── (any)
//!
//! error is reachable from every state; stopped is final.
//! ```

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamState {
    Idle,
    Prebuffering,
    Running,
    Paused,
    Draining,
    Stopped,
    Error,
}

impl StreamState {
    pub const fn can_transition_to(self, next: Self) -> bool {
        use StreamState::{Draining, Error, Idle, Paused, Prebuffering, Running, Stopped};
        match (self, next) {
            (Stopped, _) => false,
            (_, Error | Stopped) => true,
            (Idle, Prebuffering)
            | (Prebuffering, Running)
            | (Running, Paused | Draining)
            | (Paused, Running) => true,
            _ => false,
        }
    }

    /// Whether the device is (or may be) pulling samples.
    pub const fn is_live(self) -> bool {
        matches!(self, Self::Running | Self::Draining)
    }

    pub const fn is_finished(self) -> bool {
        matches!(self, Self::Stopped | Self::Error)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Prebuffering => "prebuffering",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
            Self::Error => "error",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::StreamState::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [Idle, Prebuffering, Running, Paused, Running, Draining, Stopped];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn prebuffering_cannot_be_skipped() {
        assert!(!Idle.can_transition_to(Running));
        assert!(!Prebuffering.can_transition_to(Paused));
    }

    #[test]
    fn error_reachable_everywhere_but_stopped() {
        for state in [Idle, Prebuffering, Running, Paused, Draining, Error] {
            assert!(state.can_transition_to(Error));
        }
        assert!(!Stopped.can_transition_to(Error));
        assert!(!Stopped.can_transition_to(Running));
    }

    #[test]
    fn no_backwards_moves() {
        assert!(!Draining.can_transition_to(Running));
        assert!(!Running.can_transition_to(Prebuffering));
    }
}
