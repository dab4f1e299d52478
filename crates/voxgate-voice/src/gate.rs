//! Echo gate: recording streams drop input while speech is playing.
//!
//! The speech playback stream closes the gate when its device starts and
//! opens it again when the stream stops or is dropped. Recording streams
//! check the gate in their input callback.
//!
//! Guards are counted: with several playback streams live, the gate stays
//! closed until the last one releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Shared state between the process's speech playback and its recording stream.
#[derive(Debug, Clone, Default)]
pub struct EchoGate {
    /// Live [`GateGuard`]s.
    holders: Arc<AtomicUsize>,
}

impl EchoGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the gate for as long as the returned guard lives.
    #[must_use = "the gate reopens when the guard is dropped"]
    pub fn hold(&self) -> GateGuard {
        if self.holders.fetch_add(1, Ordering::SeqCst) == 0 {
            tracing::debug!("Echo gate closed: speech playing, capture muted");
        }
        GateGuard {
            holders: Arc::clone(&self.holders),
        }
    }

    /// Whether captured audio should currently be discarded.
    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.holders.load(Ordering::SeqCst) > 0
    }
}

/// Keeps the [`EchoGate`] closed until dropped.
#[derive(Debug)]
pub struct GateGuard {
    holders: Arc<AtomicUsize>,
}

impl Drop for GateGuard {
    fn drop(&mut self) {
        if self.holders.fetch_sub(1, Ordering::SeqCst) == 1 {
            tracing::debug!("Echo gate open: capture resumed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_starts_open() {
        assert!(!EchoGate::new().is_speaking());
    }

    #[test]
    fn guard_closes_until_dropped() {
        let gate = EchoGate::new();
        let guard = gate.hold();
        assert!(gate.is_speaking());
        drop(guard);
        assert!(!gate.is_speaking());
    }

    #[test]
    fn overlapping_guards_keep_the_gate_closed_until_the_last() {
        let gate = EchoGate::new();
        let first = gate.hold();
        let second = gate.clone().hold();

        drop(first);
        assert!(gate.is_speaking());
        drop(second);
        assert!(!gate.is_speaking());
    }

    #[test]
    fn clones_share_state() {
        let gate = EchoGate::new();
        let capture_side = gate.clone();
        let _guard = gate.hold();
        assert!(capture_side.is_speaking());
    }
}
