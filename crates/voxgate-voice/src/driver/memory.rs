//! In-memory driver for tests.
//!
//! Output streams are drained by a worker thread into a record that tests can
//! inspect; input streams are fed by [`MemoryDriver::feed_input`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use super::{AudioDriver, DeviceInfo, DeviceStream, StreamConfig};
use crate::error::AudioError;
use crate::gate::EchoGate;
use crate::stream::StreamBuffer;

const DEVICE_NAME: &str = "memory";
const PULL_CHUNK: usize = 256;

/// How the fake device behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryMode {
    /// Streams open and consume promptly.
    #[default]
    Normal,
    /// No device: every open fails with `DeviceUnavailable`.
    Unavailable,
    /// Streams open but never consume.
    Stalled,
}

#[derive(Debug, Default)]
struct OutputRecord {
    samples: Vec<f32>,
    fill_at_play: Option<usize>,
}

struct InputTap {
    buffer: Weak<StreamBuffer>,
    gate: EchoGate,
    running: Arc<AtomicBool>,
}

#[derive(Default)]
struct Shared {
    mode: Mutex<MemoryMode>,
    outputs: Mutex<Vec<Arc<Mutex<OutputRecord>>>>,
    inputs: Mutex<Vec<InputTap>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fake audio device. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryDriver {
    shared: Arc<Shared>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: MemoryMode) -> Self {
        let driver = Self::default();
        driver.set_mode(mode);
        driver
    }

    pub fn set_mode(&self, mode: MemoryMode) {
        *lock(&self.shared.mode) = mode;
    }

    fn mode(&self) -> MemoryMode {
        *lock(&self.shared.mode)
    }

    /// Number of output streams opened so far.
    pub fn outputs_opened(&self) -> usize {
        lock(&self.shared.outputs).len()
    }

    /// Samples the most recent output stream delivered to the "speaker".
    pub fn played(&self) -> Vec<f32> {
        lock(&self.shared.outputs)
            .last()
            .map(|record| lock(record).samples.clone())
            .unwrap_or_default()
    }

    /// Buffered samples when the most recent output stream was first played.
    pub fn fill_at_play(&self) -> Option<usize> {
        lock(&self.shared.outputs)
            .last()
            .and_then(|record| lock(record).fill_at_play)
    }

    /// Deliver microphone samples to every running input stream.
    pub fn feed_input(&self, samples: &[f32]) {
        let mut inputs = lock(&self.shared.inputs);
        inputs.retain(|tap| tap.buffer.strong_count() > 0);
        for tap in inputs.iter() {
            if !tap.running.load(Ordering::SeqCst) || tap.gate.is_speaking() {
                continue;
            }
            if let Some(buffer) = tap.buffer.upgrade() {
                buffer.capture(samples);
            }
        }
    }

    fn check_device(&self, config: &StreamConfig) -> Result<(), AudioError> {
        if self.mode() == MemoryMode::Unavailable {
            return Err(AudioError::device_unavailable("memory device unplugged"));
        }
        match config.device.as_deref() {
            Some(name) if name != DEVICE_NAME => Err(AudioError::device_unavailable(format!(
                "no device named {name:?}"
            ))),
            _ => Ok(()),
        }
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        if self.mode() == MemoryMode::Unavailable {
            return Vec::new();
        }
        vec![DeviceInfo {
            name: DEVICE_NAME.into(),
            is_default: true,
        }]
    }
}

impl AudioDriver for MemoryDriver {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn output_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self.devices())
    }

    fn input_devices(&self) -> Result<Vec<DeviceInfo>, AudioError> {
        Ok(self.devices())
    }

    fn open_output(
        &self,
        config: &StreamConfig,
        buffer: Arc<StreamBuffer>,
    ) -> Result<Box<dyn DeviceStream>, AudioError> {
        self.check_device(config)?;
        let record = Arc::new(Mutex::new(OutputRecord::default()));
        lock(&self.shared.outputs).push(Arc::clone(&record));

        Ok(Box::new(MemoryOutput {
            buffer,
            record,
            stalled: self.mode() == MemoryMode::Stalled,
            running: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            worker: None,
        }))
    }

    fn open_input(
        &self,
        config: &StreamConfig,
        gate: EchoGate,
    ) -> Result<(Box<dyn DeviceStream>, Arc<StreamBuffer>), AudioError> {
        self.check_device(config)?;
        let buffer = Arc::new(StreamBuffer::new(
            config.format,
            config.format.samples_for_ms(config.buffer_ms),
        ));
        let running = Arc::new(AtomicBool::new(false));
        lock(&self.shared.inputs).push(InputTap {
            buffer: Arc::downgrade(&buffer),
            gate,
            running: Arc::clone(&running),
        });
        Ok((Box::new(MemoryInput { running }), buffer))
    }
}

struct MemoryOutput {
    buffer: Arc<StreamBuffer>,
    record: Arc<Mutex<OutputRecord>>,
    stalled: bool,
    running: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    worker: Option<thread::JoinHandle<()>>,
}

impl DeviceStream for MemoryOutput {
    fn play(&mut self) -> Result<(), AudioError> {
        {
            let mut record = lock(&self.record);
            if record.fill_at_play.is_none() {
                record.fill_at_play = Some(self.buffer.stats().buffered);
            }
        }
        self.running.store(true, Ordering::SeqCst);

        if self.worker.is_none() && !self.stalled {
            let buffer = Arc::clone(&self.buffer);
            let record = Arc::clone(&self.record);
            let running = Arc::clone(&self.running);
            let shutdown = Arc::clone(&self.shutdown);
            self.worker = Some(thread::spawn(move || {
                let mut chunk = vec![0.0; PULL_CHUNK];
                while !shutdown.load(Ordering::SeqCst) {
                    if running.load(Ordering::SeqCst) {
                        let n = buffer.pull(&mut chunk);
                        lock(&record).samples.extend_from_slice(&chunk[..n]);
                        if n == 0 && buffer.is_finished() {
                            break;
                        }
                    }
                    thread::sleep(Duration::from_micros(200));
                }
            }));
        }
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(5)
    }
}

impl Drop for MemoryOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct MemoryInput {
    running: Arc<AtomicBool>,
}

impl DeviceStream for MemoryInput {
    fn play(&mut self) -> Result<(), AudioError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), AudioError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn latency(&self) -> Duration {
        Duration::ZERO
    }
}
