//! Input streams on a dedicated thread via `cpal`.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, Stream, SupportedStreamConfig};

use super::{DeviceInfo, DeviceStream};
use crate::clip::AudioFormat;
use crate::error::AudioError;
use crate::gate::EchoGate;
use crate::stream::StreamBuffer;

pub(super) fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = cpal::default_host();
    let default_name = host
        .default_input_device()
        .and_then(|d| d.name().ok())
        .unwrap_or_default();

    let devices = host
        .input_devices()
        .map_err(|e| AudioError::device_unavailable(e.to_string()))?;

    Ok(devices
        .filter_map(|device| device.name().ok())
        .map(|name| DeviceInfo {
            is_default: name == default_name,
            name,
        })
        .collect())
}

fn find_device(name: Option<&str>) -> Result<Device, AudioError> {
    let host = cpal::default_host();
    match name {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| AudioError::device_unavailable(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == wanted))
            .ok_or_else(|| AudioError::device_unavailable(format!("no input device named {wanted:?}"))),
        None => host
            .default_input_device()
            .ok_or_else(|| AudioError::device_unavailable("no default input device")),
    }
}

/// Build a cpal input stream that captures into `buffer` unless the gate is closed.
fn build_input_stream(
    device: &Device,
    config: &SupportedStreamConfig,
    buffer: &Arc<StreamBuffer>,
    gate: &EchoGate,
) -> Result<Stream, AudioError> {
    let stream_config: cpal::StreamConfig = config.clone().into();
    let sample_format = config.sample_format();

    let err_fn = |err: cpal::StreamError| {
        tracing::error!(%err, "Audio input stream error");
    };

    let stream = match sample_format {
        SampleFormat::F32 => {
            let (buffer, gate) = (Arc::clone(buffer), gate.clone());
            device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if !gate.is_speaking() {
                        buffer.capture(data);
                    }
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I16 => {
            let (buffer, gate) = (Arc::clone(buffer), gate.clone());
            device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    if gate.is_speaking() {
                        return;
                    }
                    let converted: Vec<f32> = data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                    buffer.capture(&converted);
                },
                err_fn,
                None,
            )
        }
        SampleFormat::I32 => {
            let (buffer, gate) = (Arc::clone(buffer), gate.clone());
            device.build_input_stream(
                &stream_config,
                move |data: &[i32], _: &cpal::InputCallbackInfo| {
                    if gate.is_speaking() {
                        return;
                    }
                    #[allow(clippy::cast_precision_loss)]
                    let converted: Vec<f32> = data.iter().map(|&s| s as f32 / 2_147_483_648.0).collect();
                    buffer.capture(&converted);
                },
                err_fn,
                None,
            )
        }
        other => {
            return Err(AudioError::stream_open(format!(
                "unsupported sample format: {other:?}"
            )));
        }
    };

    stream.map_err(|e| AudioError::stream_open(e.to_string()))
}

enum CaptureCommand {
    Play {
        reply: mpsc::Sender<Result<(), AudioError>>,
    },
    Pause {
        reply: mpsc::Sender<Result<(), AudioError>>,
    },
    Shutdown,
}

/// `Send` proxy for a cpal input stream living on its own thread.
pub(super) struct CaptureThread {
    cmd_tx: mpsc::Sender<CaptureCommand>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CaptureThread {
    pub(super) fn spawn(
        device: Option<String>,
        buffer_ms: u32,
        gate: EchoGate,
    ) -> Result<(Self, Arc<StreamBuffer>), AudioError> {
        let (cmd_tx, cmd_rx) = mpsc::channel::<CaptureCommand>();
        let (init_tx, init_rx) = mpsc::channel::<Result<Arc<StreamBuffer>, AudioError>>();

        let thread = thread::Builder::new()
            .name("voxgate-capture".into())
            .spawn(move || run(device.as_deref(), buffer_ms, &gate, &cmd_rx, &init_tx))
            .map_err(|e| AudioError::stream_open(format!("failed to spawn capture thread: {e}")))?;

        let buffer = init_rx.recv().map_err(|_| AudioError::DeviceThreadDied)??;

        Ok((
            Self {
                cmd_tx,
                thread: Some(thread),
            },
            buffer,
        ))
    }

    fn send_and_recv(
        &self,
        build: impl FnOnce(mpsc::Sender<Result<(), AudioError>>) -> CaptureCommand,
    ) -> Result<(), AudioError> {
        let (tx, rx) = mpsc::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| AudioError::DeviceThreadDied)?;
        rx.recv().map_err(|_| AudioError::DeviceThreadDied)?
    }
}

impl DeviceStream for CaptureThread {
    fn play(&mut self) -> Result<(), AudioError> {
        self.send_and_recv(|reply| CaptureCommand::Play { reply })
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.send_and_recv(|reply| CaptureCommand::Pause { reply })
    }

    fn stop(&mut self) {
        let _ = self.cmd_tx.send(CaptureCommand::Shutdown);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }

    fn latency(&self) -> Duration {
        Duration::ZERO
    }
}

impl Drop for CaptureThread {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    device: Option<&str>,
    buffer_ms: u32,
    gate: &EchoGate,
    cmd_rx: &mpsc::Receiver<CaptureCommand>,
    init_tx: &mpsc::Sender<Result<Arc<StreamBuffer>, AudioError>>,
) {
    let opened = find_device(device).and_then(|device| {
        let config = device
            .default_input_config()
            .map_err(|e| AudioError::stream_open(e.to_string()))?;
        let format = AudioFormat::new(config.sample_rate().0, config.channels());
        let buffer = Arc::new(StreamBuffer::new(format, format.samples_for_ms(buffer_ms)));
        let stream = build_input_stream(&device, &config, &buffer, gate)?;
        // Some hosts start streams on build.
        let _ = stream.pause();

        tracing::info!(
            device = %device.name().unwrap_or_default(),
            sample_rate = format.sample_rate,
            channels = format.channels,
            "Audio capture opened"
        );
        Ok((stream, buffer))
    });

    let stream = match opened {
        Ok((stream, buffer)) => {
            if init_tx.send(Ok(buffer)).is_err() {
                return;
            }
            stream
        }
        Err(e) => {
            let _ = init_tx.send(Err(e));
            return;
        }
    };

    while let Ok(cmd) = cmd_rx.recv() {
        match cmd {
            CaptureCommand::Play { reply } => {
                let _ = reply.send(stream.play().map_err(|e| AudioError::stream_open(e.to_string())));
            }
            CaptureCommand::Pause { reply } => {
                let _ = reply.send(stream.pause().map_err(|e| AudioError::stream_open(e.to_string())));
            }
            CaptureCommand::Shutdown => break,
        }
    }

    drop(stream);
    tracing::debug!("Capture thread shutting down");
}
