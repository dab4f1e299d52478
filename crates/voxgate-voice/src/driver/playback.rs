//! Output streams on a dedicated thread via `rodio`.
//!
//! The thread owns the `rodio::OutputStream` and a `Sink` fed by a
//! [`BufferSource`] that pulls from the stream's shared buffer. The sink is
//! created paused so prebuffered audio stays put until `play`.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait};
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};

use super::{DeviceInfo, DeviceStream};
use crate::error::AudioError;
use crate::stream::StreamBuffer;

/// Frames pulled from the shared buffer per refill.
const CHUNK_FRAMES: usize = 256;

// ── Source ─────────────────────────────────────────────────────────

/// `rodio::Source` reading from a [`StreamBuffer`].
///
/// Yields silence while the buffer is starved or paused and ends once input
/// is closed and every sample has been delivered.
struct BufferSource {
    buffer: Arc<StreamBuffer>,
    chunk: Vec<f32>,
    pos: usize,
    channels: u16,
    sample_rate: u32,
}

impl BufferSource {
    fn new(buffer: Arc<StreamBuffer>) -> Self {
        let format = buffer.format();
        let chunk_len = CHUNK_FRAMES * usize::from(format.channels.max(1));
        Self {
            buffer,
            chunk: vec![0.0; chunk_len],
            pos: chunk_len,
            channels: format.channels,
            sample_rate: format.sample_rate,
        }
    }

    fn refill(&mut self) -> Option<()> {
        let n = self.buffer.pull(&mut self.chunk);
        if n == 0 && self.buffer.is_finished() {
            return None;
        }
        self.chunk[n..].fill(0.0);
        self.pos = 0;
        Some(())
    }
}

impl Iterator for BufferSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.pos >= self.chunk.len() {
            self.refill()?;
        }
        let sample = self.chunk[self.pos];
        self.pos += 1;
        Some(sample)
    }
}

impl Source for BufferSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

// ── Device lookup ──────────────────────────────────────────────────

pub(super) fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = cpal::default_host();
    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::device_unavailable(e.to_string()))?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .map(|name| DeviceInfo {
            is_default: name == default_name,
            name,
        })
        .collect())
}

fn open_device(name: Option<&str>) -> Result<(OutputStream, OutputStreamHandle), AudioError> {
    let host = cpal::default_host();
    let device = match name {
        Some(wanted) => host
            .output_devices()
            .map_err(|e| AudioError::device_unavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| AudioError::device_unavailable(format!("no output device named {wanted:?}")))?,
        None => host
            .default_output_device()
            .ok_or_else(|| AudioError::device_unavailable("no default output device"))?,
    };

    tracing::info!(
        device = %device.name().unwrap_or_default(),
        "Opening audio output"
    );

    OutputStream::try_from_device(&device).map_err(|e| AudioError::stream_open(e.to_string()))
}

// ── Thread handle ──────────────────────────────────────────────────

enum PlaybackCommand {
    Play {
        reply: mpsc::Sender<Result<(), AudioError>>,
    },
    Pause {
        reply: mpsc::Sender<Result<(), AudioError>>,
    },
    Shutdown,
}

/// `Send` proxy for an output stream living on its own thread.
pub(super) struct PlaybackThread {
    cmd_tx: mpsc::Sender<PlaybackCommand>,
    thread: Option<thread::JoinHandle<()>>,
    latency: Duration,
}

impl PlaybackThread {
    /// Spawn the thread and open the device; errors come back through a
    /// one-shot init channel.
    pub(super) fn spawn(device: Option<String>, buffer: Arc<StreamBuffer>) -> Result<Self, AudioError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<PlaybackCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<(), AudioError>>();
        let latency = buffer.format().duration_of(CHUNK_FRAMES * usize::from(buffer.format().channels));

        let thread = thread::Builder::new()
            .name("voxgate-playback".into())
            .spawn(move || run(device.as_deref(), buffer, &cmd_rx, &init_tx))
            .map_err(|e| AudioError::stream_open(format!("failed to spawn playback thread: {e}")))?;

        init_rx.recv().map_err(|_| AudioError::DeviceThreadDied)??;

        Ok(Self {
            cmd_tx,
            thread: Some(thread),
            latency,
        })
    }

    fn send_and_recv(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<(), AudioError>>) -> PlaybackCommand,
    ) -> Result<(), AudioError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| AudioError::DeviceThreadDied)?;
        rx.recv().map_err(|_| AudioError::DeviceThreadDied)?
    }
}

impl DeviceStream for PlaybackThread {
    fn play(&mut self) -> Result<(), AudioError> {
        self.send_and_recv(|reply| PlaybackCommand::Play { reply })
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.send_and_recv(|reply| PlaybackCommand::Pause { reply })
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(PlaybackCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn latency(&self) -> Duration {
        self.latency
    }
}

impl Drop for PlaybackThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    device: Option<&str>,
    buffer: Arc<StreamBuffer>,
    cmd_rx: &mpsc::Receiver<PlaybackCommand>,
    init_tx: &mpsc::Sender<Result<(), AudioError>>,
) {
    let (stream, handle) = match open_device(device) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    let sink = match Sink::try_new(&handle) {
        Ok(sink) => sink,
        Err(e) => {
            let _ = init_tx.send(Err(AudioError::stream_open(e.to_string())));
            return;
        }
    };
    sink.pause();
    sink.append(BufferSource::new(buffer));

    if init_tx.send(Ok(())).is_err() {
        return;
    }

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            PlaybackCommand::Play { reply } => {
                sink.play();
                let _ = reply.send(Ok(()));
            }
            PlaybackCommand::Pause { reply } => {
                sink.pause();
                let _ = reply.send(Ok(()));
            }
            PlaybackCommand::Shutdown => break,
        }
    }

    sink.stop();
    drop(stream);
    tracing::debug!("Playback thread shutting down");
}
