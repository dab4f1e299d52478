//! Playback and recording streams.
//!
//! [`AudioBufferManager`] opens streams on an [`AudioDriver`](crate::driver::AudioDriver);
//! each [`StreamHandle`] owns a [`StreamBuffer`] shared with the device and
//! walks the [`StreamState`] machine.

mod buffer;
mod handle;
mod manager;
mod state;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

pub use buffer::{BufferStats, StreamBuffer};
pub use handle::StreamHandle;
pub use manager::{
    AudioBufferManager, ClipPlayer, PlaybackOptions, PlaybackRole, RecordingOptions,
};
pub use state::StreamState;

/// Default speech output format (most synthesizers produce 22.05 or 24 kHz mono).
pub const DEFAULT_SAMPLE_RATE: u32 = 24_000;

/// Recoverable under/overruns before a stream reports a playback failure.
pub const DEFAULT_XRUN_LIMIT: u64 = 32;

/// Process-unique stream identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct StreamId(u64);

impl StreamId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StreamKind {
    Playback,
    Recording,
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Playback => "playback",
            Self::Recording => "recording",
        })
    }
}

/// Snapshot returned by [`StreamHandle::health`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamHealth {
    /// Buffered fraction of capacity, `0.0..=1.0` (may exceed 1.0 while prebuffering).
    pub fill_level: f32,
    pub underrun_count: u64,
    pub overrun_count: u64,
    /// Buffered audio plus device latency.
    pub latency_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_ids_are_unique() {
        let a = StreamId::next();
        let b = StreamId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("stream-"));
    }
}
