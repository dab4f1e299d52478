//! One open stream and its lifecycle.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::manager::{PlaybackRole, Registry, check_duck_amount};
use super::{StreamBuffer, StreamHealth, StreamId, StreamKind, StreamState};
use crate::clip::{AudioClip, AudioFormat, FormatPolicy};
use crate::driver::DeviceStream;
use crate::error::AudioError;
use crate::gate::GateGuard;

pub(super) struct HandleConfig {
    pub(super) role: PlaybackRole,
    pub(super) prebuffer_samples: usize,
    pub(super) write_timeout: Duration,
    pub(super) drain_timeout: Duration,
    pub(super) xrun_limit: u64,
    pub(super) duck_others: Option<f32>,
    pub(super) read_format: Option<AudioFormat>,
    pub(super) format_policy: FormatPolicy,
}

/// An open playback or recording stream.
///
/// Owned by the creating code and never shared across processes. Dropping
/// the handle stops the stream and releases the device.
pub struct StreamHandle {
    id: StreamId,
    kind: StreamKind,
    state: StreamState,
    buffer: Arc<StreamBuffer>,
    device: Option<Box<dyn DeviceStream>>,
    registry: Arc<Registry>,
    config: HandleConfig,
    /// `start` was called before the prebuffer threshold was reached.
    start_requested: bool,
    gate: Option<GateGuard>,
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl StreamHandle {
    pub(super) fn new(
        id: StreamId,
        kind: StreamKind,
        buffer: Arc<StreamBuffer>,
        device: Box<dyn DeviceStream>,
        registry: Arc<Registry>,
        config: HandleConfig,
    ) -> Self {
        Self {
            id,
            kind,
            state: StreamState::Idle,
            buffer,
            device: Some(device),
            registry,
            config,
            start_requested: false,
            gate: None,
        }
    }

    pub const fn id(&self) -> StreamId {
        self.id
    }

    pub const fn kind(&self) -> StreamKind {
        self.kind
    }

    pub const fn state(&self) -> StreamState {
        self.state
    }

    pub fn format(&self) -> AudioFormat {
        self.buffer.format()
    }

    // ── Playback data path ─────────────────────────────────────────

    /// Accumulate audio without starting the device. Callable repeatedly.
    pub fn prebuffer(&mut self, data: &[f32]) -> Result<(), AudioError> {
        self.expect_kind(StreamKind::Playback, "prebuffer")?;
        self.check_frames(data)?;
        match self.state {
            StreamState::Idle => self.transition(StreamState::Prebuffering, "prebuffer")?,
            StreamState::Prebuffering => {}
            state => return Err(AudioError::InvalidState { op: "prebuffer", state }),
        }
        self.buffer.append(data);
        self.start_if_ready()
    }

    /// Append audio. Blocks while the buffer is full; audio the device does
    /// not make room for within the write timeout is dropped as an overrun.
    ///
    /// Before the device has started this behaves like [`prebuffer`](Self::prebuffer).
    pub fn write(&mut self, data: &[f32]) -> Result<(), AudioError> {
        self.expect_kind(StreamKind::Playback, "write")?;
        match self.state {
            StreamState::Idle | StreamState::Prebuffering => return self.prebuffer(data),
            StreamState::Running | StreamState::Paused => {}
            state => return Err(AudioError::InvalidState { op: "write", state }),
        }
        self.check_frames(data)?;
        self.check_glitches()?;

        let dropped = self.buffer.push(data, self.config.write_timeout);
        if dropped > 0 {
            tracing::warn!(stream = %self.id, dropped, "Device stalled; audio dropped");
        }
        Ok(())
    }

    // ── Recording data path ────────────────────────────────────────

    /// Take everything captured since the last read.
    pub fn read(&mut self) -> Result<AudioClip, AudioError> {
        self.expect_kind(StreamKind::Recording, "read")?;
        if self.state.is_finished() {
            return Err(AudioError::InvalidState {
                op: "read",
                state: self.state,
            });
        }
        let format = self.buffer.format();
        let clip = AudioClip::new(self.buffer.take_all(), format.sample_rate, format.channels);
        match self.config.read_format {
            Some(target) if !clip.is_empty() => clip.conform(target, self.config.format_policy),
            Some(target) => Ok(AudioClip::new(Vec::new(), target.sample_rate, target.channels)),
            None => Ok(clip),
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────────

    /// Start the device, or arm it to start once the prebuffer threshold is met.
    pub fn start(&mut self) -> Result<(), AudioError> {
        match self.state {
            StreamState::Idle => self.transition(StreamState::Prebuffering, "start")?,
            StreamState::Prebuffering => {}
            StreamState::Running => return Ok(()),
            state => return Err(AudioError::InvalidState { op: "start", state }),
        }
        self.start_requested = true;
        if self.kind == StreamKind::Recording {
            return self.begin();
        }
        self.start_if_ready()
    }

    pub fn pause(&mut self) -> Result<(), AudioError> {
        match self.state {
            StreamState::Paused => return Ok(()),
            StreamState::Running => {}
            state => return Err(AudioError::InvalidState { op: "pause", state }),
        }
        self.buffer.set_paused(true);
        self.with_device(|device| device.pause())?;
        self.transition(StreamState::Paused, "pause")
    }

    pub fn resume(&mut self) -> Result<(), AudioError> {
        match self.state {
            StreamState::Running => return Ok(()),
            StreamState::Paused => {}
            state => return Err(AudioError::InvalidState { op: "resume", state }),
        }
        self.buffer.set_paused(false);
        self.with_device(|device| device.play())?;
        self.transition(StreamState::Running, "resume")
    }

    /// Play out everything buffered, then close the stream.
    ///
    /// A stream still waiting for its prebuffer threshold is started first,
    /// so clips shorter than the threshold are not lost. Blocks until the
    /// device has consumed the buffer or the drain timeout expires.
    pub fn drain(&mut self) -> Result<(), AudioError> {
        match self.state {
            StreamState::Idle | StreamState::Prebuffering => {
                if self.state == StreamState::Idle {
                    self.transition(StreamState::Prebuffering, "drain")?;
                }
                self.begin()?;
            }
            StreamState::Paused => self.resume()?,
            StreamState::Running => {}
            state => return Err(AudioError::InvalidState { op: "drain", state }),
        }
        self.check_glitches()?;
        self.transition(StreamState::Draining, "drain")?;

        self.buffer.close_input();
        if let Err(remaining) = self.buffer.wait_empty(self.config.drain_timeout) {
            self.fail();
            return Err(AudioError::DrainTimeout { remaining });
        }
        // Wait out the device's own queue.
        let tail = self.device.as_ref().map_or(Duration::ZERO, |d| d.latency());
        thread::sleep(tail);

        tracing::debug!(stream = %self.id, "Stream drained");
        self.close(StreamState::Stopped);
        Ok(())
    }

    /// Stop immediately, discarding buffered audio. Idempotent.
    pub fn stop(&mut self) -> Result<(), AudioError> {
        if self.state != StreamState::Stopped {
            self.close(StreamState::Stopped);
            tracing::debug!(stream = %self.id, "Stream stopped");
        }
        Ok(())
    }

    // ── Ducking ────────────────────────────────────────────────────

    /// Attenuate every other open playback stream to `amount` (0.0–1.0).
    pub fn duck(&mut self, amount: f32) -> Result<(), AudioError> {
        check_duck_amount(amount)?;
        self.registry.duck(self.id, amount);
        Ok(())
    }

    /// Restore streams ducked by this handle.
    pub fn unduck(&mut self) {
        self.registry.unduck(self.id);
    }

    // ── Health ─────────────────────────────────────────────────────

    pub fn health(&self) -> StreamHealth {
        let stats = self.buffer.stats();
        #[allow(clippy::cast_precision_loss)]
        let fill_level = stats.buffered as f32 / stats.capacity as f32;
        let device_latency = self.device.as_ref().map_or(Duration::ZERO, |d| d.latency());
        let latency = self.buffer.format().duration_of(stats.buffered) + device_latency;

        StreamHealth {
            fill_level,
            underrun_count: stats.underruns,
            overrun_count: stats.overruns,
            latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        }
    }

    // ── Internals ──────────────────────────────────────────────────

    fn transition(&mut self, next: StreamState, op: &'static str) -> Result<(), AudioError> {
        if !self.state.can_transition_to(next) {
            return Err(AudioError::InvalidState { op, state: self.state });
        }
        self.state = next;
        Ok(())
    }

    fn expect_kind(&self, kind: StreamKind, op: &'static str) -> Result<(), AudioError> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(AudioError::InvalidState { op, state: self.state })
        }
    }

    fn check_frames(&self, data: &[f32]) -> Result<(), AudioError> {
        let channels = usize::from(self.buffer.format().channels);
        if data.len() % channels == 0 {
            Ok(())
        } else {
            Err(AudioError::InvalidArgument(format!(
                "{} samples is not a whole number of {channels}-channel frames",
                data.len()
            )))
        }
    }

    fn check_glitches(&mut self) -> Result<(), AudioError> {
        let stats = self.buffer.stats();
        if stats.underruns + stats.overruns > self.config.xrun_limit {
            tracing::warn!(
                stream = %self.id,
                underruns = stats.underruns,
                overruns = stats.overruns,
                "Glitch threshold exceeded"
            );
            self.fail();
            return Err(AudioError::Glitches {
                underruns: stats.underruns,
                overruns: stats.overruns,
            });
        }
        Ok(())
    }

    fn start_if_ready(&mut self) -> Result<(), AudioError> {
        if self.start_requested
            && self.state == StreamState::Prebuffering
            && self.buffer.stats().buffered >= self.config.prebuffer_samples
        {
            self.begin()?;
        }
        Ok(())
    }

    /// Tell the device to start.
    fn begin(&mut self) -> Result<(), AudioError> {
        self.buffer.set_bounded(true);
        if let Err(e) = self.with_device(|device| device.play()) {
            self.fail();
            return Err(e);
        }
        self.transition(StreamState::Running, "start")?;

        if self.kind == StreamKind::Playback && self.config.role == PlaybackRole::Speech {
            self.gate = Some(self.registry.gate.hold());
            if let Some(amount) = self.config.duck_others {
                self.registry.duck(self.id, amount);
            }
        }
        tracing::debug!(
            stream = %self.id,
            buffered = self.buffer.stats().buffered,
            "Device started"
        );
        Ok(())
    }

    fn with_device(
        &mut self,
        op: impl FnOnce(&mut dyn DeviceStream) -> Result<(), AudioError>,
    ) -> Result<(), AudioError> {
        match self.device.as_deref_mut() {
            Some(device) => op(device),
            None => Err(AudioError::DeviceThreadDied),
        }
    }

    fn fail(&mut self) {
        self.close(StreamState::Error);
    }

    /// Release the device, the gate and any ducking; leave the registry.
    fn close(&mut self, state: StreamState) {
        self.buffer.clear();
        if let Some(mut device) = self.device.take() {
            device.stop();
        }
        self.gate = None;
        self.registry.unregister(self.id);
        self.state = state;
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.device.is_some() {
            self.close(StreamState::Stopped);
        }
    }
}
