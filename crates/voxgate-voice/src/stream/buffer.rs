//! Sample buffer shared between a stream handle and its device.
//!
//! Playback: the handle appends, the device pulls. Before the device starts
//! the buffer is unbounded (prebuffer); afterwards writes block while it is
//! full. Recording runs the other way round: the device appends, the handle
//! takes.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::clip::AudioFormat;

/// Counters and occupancy of a [`StreamBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub buffered: usize,
    pub capacity: usize,
    pub underruns: u64,
    pub overruns: u64,
    /// Samples handed to the device (playback) or taken by the reader (recording).
    pub delivered: u64,
    /// Samples discarded by overruns.
    pub dropped: u64,
}

#[derive(Debug)]
struct BufferState {
    samples: VecDeque<f32>,
    capacity: usize,
    gain: f32,
    bounded: bool,
    paused: bool,
    input_closed: bool,
    starved: bool,
    underruns: u64,
    overruns: u64,
    delivered: u64,
    dropped: u64,
}

#[derive(Debug)]
pub struct StreamBuffer {
    format: AudioFormat,
    state: Mutex<BufferState>,
    changed: Condvar,
}

impl StreamBuffer {
    /// `capacity` is rounded down to whole frames, and is at least one frame.
    pub fn new(format: AudioFormat, capacity: usize) -> Self {
        let channels = usize::from(format.channels.max(1));
        let capacity = (capacity / channels).max(1) * channels;
        Self {
            format,
            state: Mutex::new(BufferState {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                gain: 1.0,
                bounded: false,
                paused: false,
                input_closed: false,
                starved: false,
                underruns: 0,
                overruns: 0,
                delivered: 0,
                dropped: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub const fn format(&self) -> AudioFormat {
        self.format
    }

    fn channels(&self) -> usize {
        usize::from(self.format.channels.max(1))
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Producer side (playback) ───────────────────────────────────

    /// Append without any capacity limit.
    pub fn append(&self, data: &[f32]) {
        let mut state = self.lock();
        state.samples.extend(data);
        drop(state);
        self.changed.notify_all();
    }

    /// Append, blocking while the buffer is full.
    ///
    /// Only whole frames go in while space is short, so a partial write never
    /// splits one. If the device consumes nothing for `timeout`, the rest of
    /// `data` is dropped and one overrun is counted. Returns the number of
    /// samples dropped.
    pub fn push(&self, data: &[f32], timeout: Duration) -> usize {
        let mut state = self.lock();
        if !state.bounded {
            state.samples.extend(data);
            drop(state);
            self.changed.notify_all();
            return 0;
        }

        let channels = self.channels();
        let mut rest = data;
        let mut stall_started = Instant::now();
        while !rest.is_empty() {
            let space = state.capacity.saturating_sub(state.samples.len());
            let n = fitting(space, rest.len(), channels);
            if n > 0 {
                state.samples.extend(&rest[..n]);
                rest = &rest[n..];
                stall_started = Instant::now();
                self.changed.notify_all();
                continue;
            }

            let waited = stall_started.elapsed();
            if waited >= timeout {
                state.overruns += 1;
                state.dropped += rest.len() as u64;
                tracing::debug!(dropped = rest.len(), "Playback buffer overrun");
                return rest.len();
            }
            state = self
                .changed
                .wait_timeout(state, timeout - waited)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        0
    }

    /// Switch from prebuffer mode to bounded writes.
    pub fn set_bounded(&self, bounded: bool) {
        self.lock().bounded = bounded;
    }

    /// No more input will arrive; the device may finish once empty.
    pub fn close_input(&self) {
        self.lock().input_closed = true;
        self.changed.notify_all();
    }

    // ── Device side (playback) ─────────────────────────────────────

    /// Move up to `out.len()` samples into `out`, applying the current gain.
    ///
    /// Returns how many real samples were written; the caller fills the rest
    /// with silence. An empty buffer while input is still open counts as one
    /// underrun per starvation episode.
    pub fn pull(&self, out: &mut [f32]) -> usize {
        let mut state = self.lock();
        if state.paused {
            return 0;
        }

        let n = out.len().min(state.samples.len());
        let gain = state.gain;
        for (slot, sample) in out.iter_mut().zip(state.samples.drain(..n)) {
            *slot = sample * gain;
        }
        state.delivered += n as u64;

        if n == 0 && !out.is_empty() && !state.input_closed {
            if !state.starved {
                state.starved = true;
                state.underruns += 1;
                tracing::debug!("Playback buffer underrun");
            }
        } else if n > 0 {
            state.starved = false;
        }

        drop(state);
        self.changed.notify_all();
        n
    }

    /// Input closed and every sample delivered.
    pub fn is_finished(&self) -> bool {
        let state = self.lock();
        state.input_closed && state.samples.is_empty()
    }

    // ── Device side (recording) ────────────────────────────────────

    /// Append captured audio; anything beyond capacity is dropped as an overrun.
    pub fn capture(&self, data: &[f32]) {
        let channels = self.channels();
        let mut state = self.lock();
        let space = state.capacity.saturating_sub(state.samples.len());
        let n = fitting(space, data.len(), channels);
        state.samples.extend(&data[..n]);
        if n < data.len() {
            state.overruns += 1;
            state.dropped += (data.len() - n) as u64;
        }
    }

    /// Take everything captured so far.
    pub fn take_all(&self) -> Vec<f32> {
        let mut state = self.lock();
        let taken: Vec<f32> = state.samples.drain(..).collect();
        state.delivered += taken.len() as u64;
        taken
    }

    // ── Control ────────────────────────────────────────────────────

    /// Block until the device has pulled every buffered sample.
    ///
    /// Returns `Err(remaining)` on timeout.
    pub fn wait_empty(&self, timeout: Duration) -> Result<(), usize> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while !state.samples.is_empty() {
            let now = Instant::now();
            if now >= deadline {
                return Err(state.samples.len());
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        Ok(())
    }

    pub fn set_paused(&self, paused: bool) {
        self.lock().paused = paused;
        self.changed.notify_all();
    }

    /// Set the output multiplier (ducking).
    pub fn set_gain(&self, gain: f32) {
        self.lock().gain = gain.clamp(0.0, 1.0);
    }

    pub fn gain(&self) -> f32 {
        self.lock().gain
    }

    /// Discard buffered audio and release blocked writers.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.samples.clear();
        state.input_closed = true;
        drop(state);
        self.changed.notify_all();
    }

    pub fn stats(&self) -> BufferStats {
        let state = self.lock();
        BufferStats {
            buffered: state.samples.len(),
            capacity: state.capacity,
            underruns: state.underruns,
            overruns: state.overruns,
            delivered: state.delivered,
            dropped: state.dropped,
        }
    }
}

/// How much of `len` pending samples to move into `space`: all of it when it
/// fits, otherwise whole frames only.
const fn fitting(space: usize, len: usize, channels: usize) -> usize {
    if len <= space {
        len
    } else {
        space / channels * channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn buffer(capacity: usize) -> StreamBuffer {
        StreamBuffer::new(AudioFormat::new(16_000, 1), capacity)
    }

    #[test]
    fn capacity_is_whole_frames() {
        let stereo = StreamBuffer::new(AudioFormat::new(22_050, 2), 2_205);
        assert_eq!(stereo.stats().capacity, 2_204);
        let tiny = StreamBuffer::new(AudioFormat::new(22_050, 2), 1);
        assert_eq!(tiny.stats().capacity, 2);
    }

    #[test]
    fn bounded_push_never_splits_a_frame() {
        let buf = StreamBuffer::new(AudioFormat::new(44_100, 2), 6);
        buf.set_bounded(true);
        buf.append(&[0.0; 3]);

        // Three free slots fit one frame; the second frame is dropped whole.
        let dropped = buf.push(&[0.1, 0.2, 0.3, 0.4], Duration::from_millis(20));
        assert_eq!(dropped, 2);
        assert_eq!(buf.stats().buffered, 5);
        assert_eq!(buf.stats().dropped, 2);
    }

    #[test]
    fn prebuffer_ignores_capacity() {
        let buf = buffer(4);
        assert_eq!(buf.push(&[0.1; 10], Duration::ZERO), 0);
        assert_eq!(buf.stats().buffered, 10);
    }

    #[test]
    fn pull_preserves_order_and_applies_gain() {
        let buf = buffer(8);
        buf.append(&[0.2, 0.4, 0.6]);
        buf.set_gain(0.5);

        let mut out = [0.0; 2];
        assert_eq!(buf.pull(&mut out), 2);
        assert!((out[0] - 0.1).abs() < 1e-6);
        assert!((out[1] - 0.2).abs() < 1e-6);
        assert_eq!(buf.stats().delivered, 2);
    }

    #[test]
    fn underrun_counted_once_per_episode() {
        let buf = buffer(8);
        let mut out = [0.0; 4];
        buf.pull(&mut out);
        buf.pull(&mut out);
        assert_eq!(buf.stats().underruns, 1);

        buf.append(&[0.1]);
        buf.pull(&mut out);
        buf.pull(&mut out);
        assert_eq!(buf.stats().underruns, 2);
    }

    #[test]
    fn empty_after_close_is_not_an_underrun() {
        let buf = buffer(8);
        buf.close_input();
        let mut out = [0.0; 4];
        assert_eq!(buf.pull(&mut out), 0);
        assert_eq!(buf.stats().underruns, 0);
        assert!(buf.is_finished());
    }

    #[test]
    fn paused_buffer_delivers_nothing() {
        let buf = buffer(8);
        buf.append(&[0.5; 4]);
        buf.set_paused(true);
        let mut out = [0.0; 4];
        assert_eq!(buf.pull(&mut out), 0);
        assert_eq!(buf.stats().underruns, 0);
        buf.set_paused(false);
        assert_eq!(buf.pull(&mut out), 4);
    }

    #[test]
    fn stalled_device_causes_overrun() {
        let buf = buffer(4);
        buf.set_bounded(true);
        let dropped = buf.push(&[0.1; 10], Duration::from_millis(20));
        assert_eq!(dropped, 6);
        let stats = buf.stats();
        assert_eq!(stats.overruns, 1);
        assert_eq!(stats.dropped, 6);
        assert_eq!(stats.buffered, 4);
    }

    #[test]
    fn blocked_writer_resumes_when_device_pulls() {
        let buf = Arc::new(buffer(4));
        buf.set_bounded(true);

        let device = {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                let mut pulled = Vec::new();
                let mut out = [0.0; 2];
                while pulled.len() < 12 {
                    let n = buf.pull(&mut out);
                    pulled.extend_from_slice(&out[..n]);
                    thread::sleep(Duration::from_millis(1));
                }
                pulled
            })
        };

        let data: Vec<f32> = (0..12u8).map(f32::from).collect();
        assert_eq!(buf.push(&data, Duration::from_secs(5)), 0);
        assert_eq!(device.join().unwrap(), data);
    }

    #[test]
    fn capture_drops_beyond_capacity() {
        let buf = buffer(3);
        buf.capture(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(buf.stats().overruns, 1);
        assert_eq!(buf.take_all(), vec![0.1, 0.2, 0.3]);
        assert!(buf.take_all().is_empty());
    }

    #[test]
    fn wait_empty_times_out_with_remaining() {
        let buf = buffer(8);
        buf.append(&[0.0; 5]);
        assert_eq!(buf.wait_empty(Duration::from_millis(10)), Err(5));
    }
}
