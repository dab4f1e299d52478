//! Device drivers behind the audio buffer manager.
//!
//! A driver opens device streams that consume from (playback) or produce
//! into (recording) a shared [`StreamBuffer`]. `cpal::Stream` and
//! `rodio::OutputStream` are `!Send` on some platforms, so the system driver
//! confines each one to a dedicated OS thread and proxies commands over a
//! channel; the [`DeviceStream`] handed back is `Send`.

mod capture;
#[cfg(any(test, feature = "test-utils"))]
mod memory;
mod playback;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clip::AudioFormat;
use crate::error::AudioError;
use crate::gate::EchoGate;
use crate::stream::StreamBuffer;

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryDriver, MemoryMode};

/// Information about an available audio device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Human-readable device name.
    pub name: String,
    /// Whether this is the system default device.
    pub is_default: bool,
}

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    /// Device name; `None` selects the system default.
    pub device: Option<String>,
    pub format: AudioFormat,
    /// Buffer capacity in milliseconds (recording streams).
    pub buffer_ms: u32,
}

/// A running (or ready) device stream.
///
/// Dropping the stream releases the device.
pub trait DeviceStream: Send {
    /// Start (or resume) pulling/pushing samples.
    fn play(&mut self) -> Result<(), AudioError>;

    /// Suspend the device without discarding buffered audio.
    fn pause(&mut self) -> Result<(), AudioError>;

    /// Release the device immediately.
    fn stop(&mut self);

    /// Latency added by the device path on top of the shared buffer.
    fn latency(&self) -> Duration;
}

/// Opens device streams.
pub trait AudioDriver: Send + Sync {
    /// Human-readable driver name (for logs).
    fn name(&self) -> &'static str;

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, AudioError>;

    fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError>;

    /// Open an output stream that pulls from `buffer`. The stream starts paused.
    fn open_output(
        &self,
        config: &StreamConfig,
        buffer: Arc<StreamBuffer>,
    ) -> Result<Box<dyn DeviceStream>, AudioError>;

    /// Open an input stream. Capture happens in the device's native format,
    /// which is the format of the returned buffer. Captured audio is dropped
    /// while `gate` reports speech. The stream starts paused.
    fn open_input(
        &self,
        config: &StreamConfig,
        gate: EchoGate,
    ) -> Result<(Box<dyn DeviceStream>, Arc<StreamBuffer>), AudioError>;
}

/// The host's real audio devices: `rodio` for output, `cpal` for input.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDriver;

impl AudioDriver for SystemDriver {
    fn name(&self) -> &'static str {
        "system"
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        playback::list_devices()
    }

    fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        capture::list_devices()
    }

    fn open_output(
        &self,
        config: &StreamConfig,
        buffer: Arc<StreamBuffer>,
    ) -> Result<Box<dyn DeviceStream>, AudioError> {
        let stream = playback::PlaybackThread::spawn(config.device.clone(), buffer)?;
        Ok(Box::new(stream))
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        gate: EchoGate,
    ) -> Result<(Box<dyn DeviceStream>, Arc<StreamBuffer>), AudioError> {
        let (stream, buffer) =
            capture::CaptureThread::spawn(config.device.clone(), config.buffer_ms, gate)?;
        Ok((Box::new(stream), buffer))
    }
}
