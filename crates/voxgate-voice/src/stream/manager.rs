//! Process-local audio buffer manager.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::handle::{HandleConfig, StreamHandle};
use super::{DEFAULT_SAMPLE_RATE, DEFAULT_XRUN_LIMIT, StreamBuffer, StreamId, StreamKind};
use crate::clip::{AudioClip, AudioFormat, FormatPolicy};
use crate::driver::{AudioDriver, DeviceInfo, StreamConfig, SystemDriver};
use crate::error::AudioError;
use crate::gate::EchoGate;

/// What a playback stream is for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlaybackRole {
    /// Synthesized speech. One per process; closes the echo gate while running.
    #[default]
    Speech,
    /// Background audio (chimes, music). Any number; ducked under speech.
    Ambient,
}

/// Options for [`AudioBufferManager::create_playback_stream`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackOptions {
    /// Output device name; `None` for the system default.
    pub device: Option<String>,
    pub format: AudioFormat,
    /// Buffer capacity once the device is running.
    pub buffer_ms: u32,
    /// Audio that must be buffered before the device is started.
    pub prebuffer_ms: u32,
    /// How long a write may wait on a device that consumes nothing.
    pub write_timeout: Duration,
    /// Upper bound on `drain`.
    pub drain_timeout: Duration,
    pub format_policy: FormatPolicy,
    pub role: PlaybackRole,
    /// Under/overruns tolerated before writes fail.
    pub xrun_limit: u64,
    /// Gain applied to other playback streams while this speech stream runs.
    pub duck_others: Option<f32>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            device: None,
            format: AudioFormat::new(DEFAULT_SAMPLE_RATE, 1),
            buffer_ms: 500,
            prebuffer_ms: 50,
            write_timeout: Duration::from_secs(2),
            drain_timeout: Duration::from_secs(30),
            format_policy: FormatPolicy::Resample,
            role: PlaybackRole::Speech,
            xrun_limit: DEFAULT_XRUN_LIMIT,
            duck_others: Some(0.3),
        }
    }
}

impl PlaybackOptions {
    /// Defaults with the stream format matching `clip`.
    pub fn for_clip(clip: &AudioClip) -> Self {
        Self {
            format: clip.format(),
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), AudioError> {
        if self.format.sample_rate == 0 || self.format.channels == 0 {
            return Err(AudioError::InvalidArgument(
                "sample rate and channel count must be > 0".into(),
            ));
        }
        if self.buffer_ms == 0 {
            return Err(AudioError::InvalidArgument("buffer_ms must be > 0".into()));
        }
        if self.prebuffer_ms > self.buffer_ms {
            return Err(AudioError::InvalidArgument(format!(
                "prebuffer_ms ({}) exceeds buffer_ms ({})",
                self.prebuffer_ms, self.buffer_ms
            )));
        }
        if let Some(amount) = self.duck_others {
            check_duck_amount(amount)?;
        }
        Ok(())
    }
}

/// Options for [`AudioBufferManager::create_recording_stream`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingOptions {
    pub device: Option<String>,
    /// Format returned by `read`; `None` keeps the device's native format.
    pub format: Option<AudioFormat>,
    pub format_policy: FormatPolicy,
    /// Capture held between reads.
    pub buffer_ms: u32,
}

impl Default for RecordingOptions {
    fn default() -> Self {
        Self {
            device: None,
            format: Some(AudioFormat::new(16_000, 1)),
            format_policy: FormatPolicy::Resample,
            buffer_ms: 30_000,
        }
    }
}

pub(super) fn check_duck_amount(amount: f32) -> Result<(), AudioError> {
    if (0.0..=1.0).contains(&amount) {
        Ok(())
    } else {
        Err(AudioError::InvalidArgument(format!(
            "duck amount must be within 0.0..=1.0, got {amount}"
        )))
    }
}

// ── Registry ───────────────────────────────────────────────────────

struct Entry {
    kind: StreamKind,
    role: Option<PlaybackRole>,
    buffer: Arc<StreamBuffer>,
}

#[derive(Default)]
struct RegistryState {
    entries: HashMap<StreamId, Entry>,
    /// Active duck requests: requesting stream → gain for everyone else.
    ducks: HashMap<StreamId, f32>,
}

impl RegistryState {
    fn slot_taken(&self, kind: StreamKind, role: Option<PlaybackRole>) -> Option<&'static str> {
        let exclusive = match (kind, role) {
            (StreamKind::Recording, _) => "recording",
            (StreamKind::Playback, Some(PlaybackRole::Speech)) => "speech playback",
            (StreamKind::Playback, _) => return None,
        };
        self.entries
            .values()
            .any(|e| e.kind == kind && e.role == role)
            .then_some(exclusive)
    }

    fn apply_gains(&self) {
        for (id, entry) in &self.entries {
            if entry.kind != StreamKind::Playback {
                continue;
            }
            let gain = self
                .ducks
                .iter()
                .filter(|(by, _)| *by != id)
                .map(|(_, amount)| *amount)
                .fold(1.0_f32, f32::min);
            entry.buffer.set_gain(gain);
        }
    }
}

/// Open streams of one manager, shared with their handles.
#[derive(Default)]
pub(super) struct Registry {
    state: Mutex<RegistryState>,
    pub(super) gate: EchoGate,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_free(&self, kind: StreamKind, role: Option<PlaybackRole>) -> Result<(), AudioError> {
        match self.lock().slot_taken(kind, role) {
            Some(what) => Err(AudioError::StreamBusy(what)),
            None => Ok(()),
        }
    }

    fn register(
        &self,
        kind: StreamKind,
        role: Option<PlaybackRole>,
        buffer: Arc<StreamBuffer>,
    ) -> Result<StreamId, AudioError> {
        let mut state = self.lock();
        if let Some(what) = state.slot_taken(kind, role) {
            return Err(AudioError::StreamBusy(what));
        }
        let id = StreamId::next();
        state.entries.insert(id, Entry { kind, role, buffer });
        state.apply_gains();
        Ok(id)
    }

    pub(super) fn unregister(&self, id: StreamId) {
        let mut state = self.lock();
        state.entries.remove(&id);
        state.ducks.remove(&id);
        state.apply_gains();
    }

    pub(super) fn duck(&self, by: StreamId, amount: f32) {
        let mut state = self.lock();
        state.ducks.insert(by, amount);
        state.apply_gains();
    }

    pub(super) fn unduck(&self, by: StreamId) {
        let mut state = self.lock();
        if state.ducks.remove(&by).is_some() {
            state.apply_gains();
        }
    }

    fn open_streams(&self) -> usize {
        self.lock().entries.len()
    }
}

// ── Manager ────────────────────────────────────────────────────────

/// Mediates this process's access to the audio device.
///
/// At most one speech playback stream and one recording stream are open at
/// a time; ambient playback streams are unlimited. Streams close when their
/// handle is stopped, drained or dropped.
#[derive(Clone)]
pub struct AudioBufferManager {
    driver: Arc<dyn AudioDriver>,
    registry: Arc<Registry>,
}

impl std::fmt::Debug for AudioBufferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioBufferManager")
            .field("driver", &self.driver.name())
            .field("open_streams", &self.registry.open_streams())
            .finish()
    }
}

impl AudioBufferManager {
    /// Manager on the host's audio devices.
    pub fn system() -> Self {
        Self::with_driver(Arc::new(SystemDriver))
    }

    pub fn with_driver(driver: Arc<dyn AudioDriver>) -> Self {
        Self {
            driver,
            registry: Arc::new(Registry::default()),
        }
    }

    /// The gate recording streams consult; closed while speech plays.
    pub fn echo_gate(&self) -> EchoGate {
        self.registry.gate.clone()
    }

    pub fn output_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        self.driver.output_devices()
    }

    pub fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        self.driver.input_devices()
    }

    pub fn create_playback_stream(&self, options: PlaybackOptions) -> Result<StreamHandle, AudioError> {
        options.validate()?;
        self.registry
            .ensure_free(StreamKind::Playback, Some(options.role))?;

        let format = options.format;
        let buffer = Arc::new(StreamBuffer::new(
            format,
            format.samples_for_ms(options.buffer_ms),
        ));
        let id = self
            .registry
            .register(StreamKind::Playback, Some(options.role), Arc::clone(&buffer))?;

        let config = StreamConfig {
            device: options.device.clone(),
            format,
            buffer_ms: options.buffer_ms,
        };
        let device = match self.driver.open_output(&config, Arc::clone(&buffer)) {
            Ok(device) => device,
            Err(e) => {
                self.registry.unregister(id);
                return Err(e);
            }
        };

        tracing::debug!(
            stream = %id,
            role = ?options.role,
            sample_rate = format.sample_rate,
            channels = format.channels,
            driver = self.driver.name(),
            "Playback stream created"
        );

        Ok(StreamHandle::new(
            id,
            StreamKind::Playback,
            buffer,
            device,
            Arc::clone(&self.registry),
            HandleConfig {
                role: options.role,
                prebuffer_samples: format.samples_for_ms(options.prebuffer_ms),
                write_timeout: options.write_timeout,
                drain_timeout: options.drain_timeout,
                xrun_limit: options.xrun_limit,
                duck_others: options.duck_others,
                read_format: None,
                format_policy: options.format_policy,
            },
        ))
    }

    pub fn create_recording_stream(&self, options: RecordingOptions) -> Result<StreamHandle, AudioError> {
        if options.buffer_ms == 0 {
            return Err(AudioError::InvalidArgument("buffer_ms must be > 0".into()));
        }
        self.registry.ensure_free(StreamKind::Recording, None)?;

        let config = StreamConfig {
            device: options.device.clone(),
            format: options.format.unwrap_or(AudioFormat::new(16_000, 1)),
            buffer_ms: options.buffer_ms,
        };
        let (device, buffer) = self.driver.open_input(&config, self.echo_gate())?;
        let id = self
            .registry
            .register(StreamKind::Recording, None, Arc::clone(&buffer))?;

        tracing::debug!(
            stream = %id,
            sample_rate = buffer.format().sample_rate,
            channels = buffer.format().channels,
            driver = self.driver.name(),
            "Recording stream created"
        );

        Ok(StreamHandle::new(
            id,
            StreamKind::Recording,
            buffer,
            device,
            Arc::clone(&self.registry),
            HandleConfig {
                role: PlaybackRole::Speech,
                prebuffer_samples: 0,
                write_timeout: Duration::ZERO,
                drain_timeout: Duration::ZERO,
                xrun_limit: u64::MAX,
                duck_others: None,
                read_format: options.format,
                format_policy: options.format_policy,
            },
        ))
    }

    /// Play one clip start to finish: convert, prebuffer, start, write, drain.
    ///
    /// Returns the played duration.
    pub fn play_clip(&self, clip: &AudioClip, options: PlaybackOptions) -> Result<Duration, AudioError> {
        let clip = clip.clone().conform(options.format, options.format_policy)?;
        let prebuffer = options.format.samples_for_ms(options.prebuffer_ms);
        let channels = usize::from(options.format.channels.max(1));
        let chunk = (options.format.frames_for_ms(options.buffer_ms) / 2).max(1) * channels;

        let mut stream = self.create_playback_stream(options)?;
        let split = prebuffer.min(clip.samples.len());
        let (head, tail) = clip.samples.split_at(split);

        stream.prebuffer(head)?;
        stream.start()?;
        for part in tail.chunks(chunk) {
            stream.write(part)?;
        }
        stream.drain()?;

        Ok(clip.duration())
    }
}

/// Something that can play a clip to completion.
pub trait ClipPlayer: Send + Sync {
    fn play(&self, clip: &AudioClip) -> Result<Duration, AudioError>;
}

impl ClipPlayer for AudioBufferManager {
    fn play(&self, clip: &AudioClip) -> Result<Duration, AudioError> {
        self.play_clip(clip, PlaybackOptions::for_clip(clip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MemoryDriver, MemoryMode};
    use crate::stream::StreamState;

    fn manager() -> (AudioBufferManager, MemoryDriver) {
        let driver = MemoryDriver::new();
        (AudioBufferManager::with_driver(Arc::new(driver.clone())), driver)
    }

    fn ramp(len: usize) -> Vec<f32> {
        #[allow(clippy::cast_precision_loss)]
        (0..len).map(|i| (i % 200) as f32 / 200.0).collect()
    }

    #[test]
    fn play_clip_delivers_every_sample_in_order() {
        let (manager, driver) = manager();
        let clip = AudioClip::new(ramp(24_000), 24_000, 1);

        let played = manager.play_clip(&clip, PlaybackOptions::for_clip(&clip)).unwrap();

        assert_eq!(played, Duration::from_secs(1));
        assert_eq!(driver.played(), clip.samples);
    }

    #[test]
    fn odd_rate_stereo_clip_plays_whole() {
        let (manager, driver) = manager();
        // 50 ms at 22050 Hz is half a frame short of a whole number.
        let clip = AudioClip::new(ramp(44_100), 22_050, 2);

        let played = manager.play_clip(&clip, PlaybackOptions::for_clip(&clip)).unwrap();

        assert_eq!(played, Duration::from_secs(1));
        assert_eq!(driver.played(), clip.samples);
    }

    #[test]
    fn odd_millisecond_windows_keep_frames_whole() {
        let (manager, driver) = manager();
        let clip = AudioClip::new(ramp(88_200), 44_100, 2);
        let options = PlaybackOptions {
            prebuffer_ms: 7,
            buffer_ms: 251,
            ..PlaybackOptions::for_clip(&clip)
        };

        manager.play_clip(&clip, options).unwrap();
        assert_eq!(driver.played(), clip.samples);
    }

    #[test]
    fn device_starts_only_after_prebuffer_threshold() {
        let (manager, driver) = manager();
        let options = PlaybackOptions::default();
        let threshold = options.format.samples_for_ms(options.prebuffer_ms);
        let mut stream = manager.create_playback_stream(options).unwrap();

        stream.start().unwrap();
        assert_eq!(stream.state(), StreamState::Prebuffering);

        stream.prebuffer(&vec![0.1; threshold / 2]).unwrap();
        assert_eq!(stream.state(), StreamState::Prebuffering);
        assert_eq!(driver.fill_at_play(), None);

        stream.prebuffer(&vec![0.1; threshold / 2]).unwrap();
        assert_eq!(stream.state(), StreamState::Running);
        assert!(driver.fill_at_play().unwrap() >= threshold);
    }

    #[test]
    fn short_clip_still_plays_on_drain() {
        let (manager, driver) = manager();
        let clip = AudioClip::new(vec![0.5; 100], 24_000, 1);

        manager.play_clip(&clip, PlaybackOptions::for_clip(&clip)).unwrap();

        assert_eq!(driver.played(), clip.samples);
    }

    #[test]
    fn second_speech_stream_is_busy_until_first_closes() {
        let (manager, _driver) = manager();
        let first = manager.create_playback_stream(PlaybackOptions::default()).unwrap();

        let err = manager
            .create_playback_stream(PlaybackOptions::default())
            .unwrap_err();
        assert!(matches!(err, AudioError::StreamBusy("speech playback")));

        let ambient = PlaybackOptions {
            role: PlaybackRole::Ambient,
            ..PlaybackOptions::default()
        };
        assert!(manager.create_playback_stream(ambient).is_ok());

        drop(first);
        assert!(manager.create_playback_stream(PlaybackOptions::default()).is_ok());
    }

    #[test]
    fn speech_ducks_ambient_and_restores_on_close() {
        let (manager, driver) = manager();
        let mut speech = manager.create_playback_stream(PlaybackOptions::default()).unwrap();
        speech.duck(0.25).unwrap();

        let ambient_options = PlaybackOptions {
            role: PlaybackRole::Ambient,
            ..PlaybackOptions::default()
        };
        let mut ambient = manager.create_playback_stream(ambient_options.clone()).unwrap();
        ambient.prebuffer(&[0.8; 2_400]).unwrap();
        ambient.start().unwrap();
        ambient.drain().unwrap();

        let played = driver.played();
        assert_eq!(played.len(), 2_400);
        assert!(played.iter().all(|s| (s - 0.2).abs() < 1e-6));

        speech.unduck();
        let mut ambient = manager.create_playback_stream(ambient_options).unwrap();
        ambient.prebuffer(&[0.8; 2_400]).unwrap();
        ambient.start().unwrap();
        ambient.drain().unwrap();
        assert!(driver.played().iter().all(|s| (s - 0.8).abs() < 1e-6));

        speech.stop().unwrap();
    }

    #[test]
    fn duck_rejects_out_of_range_amount() {
        let (manager, _driver) = manager();
        let mut stream = manager.create_playback_stream(PlaybackOptions::default()).unwrap();
        assert!(matches!(stream.duck(1.5), Err(AudioError::InvalidArgument(_))));
    }

    #[test]
    fn reject_policy_refuses_other_formats() {
        let (manager, _driver) = manager();
        let clip = AudioClip::new(vec![0.0; 1_600], 16_000, 1);
        let options = PlaybackOptions {
            format_policy: FormatPolicy::Reject,
            ..PlaybackOptions::default()
        };

        let err = manager.play_clip(&clip, options).unwrap_err();
        assert!(matches!(err, AudioError::FormatMismatch { .. }));
    }

    #[test]
    fn resample_policy_converts_to_stream_format() {
        let (manager, driver) = manager();
        let clip = AudioClip::new(vec![0.1; 16_000], 16_000, 1);
        let options = PlaybackOptions {
            format: AudioFormat::new(48_000, 2),
            ..PlaybackOptions::default()
        };

        let played = manager.play_clip(&clip, options).unwrap();

        let secs = played.as_secs_f64();
        assert!((0.9..=1.1).contains(&secs), "got {secs}s");
        assert!(driver.played().len() > 80_000);
    }

    #[test]
    fn unavailable_device_is_reported() {
        let driver = MemoryDriver::with_mode(MemoryMode::Unavailable);
        let manager = AudioBufferManager::with_driver(Arc::new(driver));

        let err = manager
            .create_playback_stream(PlaybackOptions::default())
            .unwrap_err();
        assert!(matches!(err, AudioError::DeviceUnavailable(_)));
        // The failed open does not hold the speech slot.
        let err = manager
            .create_playback_stream(PlaybackOptions::default())
            .unwrap_err();
        assert!(matches!(err, AudioError::DeviceUnavailable(_)));
    }

    #[test]
    fn stalled_device_overruns_then_drain_times_out() {
        let driver = MemoryDriver::with_mode(MemoryMode::Stalled);
        let manager = AudioBufferManager::with_driver(Arc::new(driver));
        let options = PlaybackOptions {
            buffer_ms: 100,
            write_timeout: Duration::from_millis(20),
            drain_timeout: Duration::from_millis(50),
            ..PlaybackOptions::default()
        };
        let capacity = options.format.samples_for_ms(options.buffer_ms);
        let prebuffer = options.format.samples_for_ms(options.prebuffer_ms);
        let mut stream = manager.create_playback_stream(options).unwrap();

        stream.prebuffer(&vec![0.0; prebuffer]).unwrap();
        stream.start().unwrap();
        stream.write(&vec![0.0; capacity]).unwrap();

        let health = stream.health();
        assert_eq!(health.overrun_count, 1);
        assert!(health.fill_level >= 1.0);

        let err = stream.drain().unwrap_err();
        assert!(matches!(err, AudioError::DrainTimeout { .. }));
        assert_eq!(stream.state(), StreamState::Error);
    }

    #[test]
    fn too_many_glitches_fail_the_next_write() {
        let driver = MemoryDriver::with_mode(MemoryMode::Stalled);
        let manager = AudioBufferManager::with_driver(Arc::new(driver));
        let options = PlaybackOptions {
            buffer_ms: 10,
            prebuffer_ms: 0,
            write_timeout: Duration::from_millis(1),
            xrun_limit: 2,
            ..PlaybackOptions::default()
        };
        let capacity = options.format.samples_for_ms(options.buffer_ms);
        let mut stream = manager.create_playback_stream(options).unwrap();
        stream.start().unwrap();

        for _ in 0..3 {
            stream.write(&vec![0.0; capacity * 2]).unwrap();
        }
        let err = stream.write(&[0.0]).unwrap_err();
        assert!(matches!(err, AudioError::Glitches { overruns: 3, .. }));
    }

    #[test]
    fn recording_is_muted_while_speech_plays() {
        let (manager, driver) = manager();
        let mut recorder = manager
            .create_recording_stream(RecordingOptions {
                format: None,
                ..RecordingOptions::default()
            })
            .unwrap();
        recorder.start().unwrap();

        driver.feed_input(&[0.1; 160]);
        let gate = manager.echo_gate().hold();
        driver.feed_input(&[0.9; 160]);
        drop(gate);

        let clip = recorder.read().unwrap();
        assert_eq!(clip.samples, vec![0.1; 160]);
    }

    #[test]
    fn recording_slot_is_exclusive() {
        let (manager, _driver) = manager();
        let _first = manager.create_recording_stream(RecordingOptions::default()).unwrap();
        let err = manager
            .create_recording_stream(RecordingOptions::default())
            .unwrap_err();
        assert!(matches!(err, AudioError::StreamBusy("recording")));
    }

    #[test]
    fn devices_are_listed_through_the_driver() {
        let (manager, _driver) = manager();
        let outputs = manager.output_devices().unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_default);
    }
}
