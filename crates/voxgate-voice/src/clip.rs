//! In-memory audio clips and format conversion.
//!
//! Samples are interleaved `f32` in `[-1.0, 1.0]`. Conversion between formats
//! is explicit: channel up/down-mixing plus FFT resampling via `rubato`.

use std::time::Duration;

use rubato::{FftFixedIn, Resampler as _};
use serde::{Deserialize, Serialize};

use crate::error::AudioError;

/// Sample rate and channel count of a clip or stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioFormat {
    pub const fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Interleaved samples per second.
    pub const fn samples_per_second(&self) -> usize {
        self.sample_rate as usize * self.channels as usize
    }

    /// Whole frames covering `ms` milliseconds, rounded down.
    pub const fn frames_for_ms(&self, ms: u32) -> usize {
        self.sample_rate as usize * ms as usize / 1000
    }

    /// Interleaved samples covering `ms` milliseconds.
    ///
    /// Always a whole number of frames.
    pub const fn samples_for_ms(&self, ms: u32) -> usize {
        self.frames_for_ms(ms) * self.channels as usize
    }

    /// Playback time of `samples` interleaved samples.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_of(&self, samples: usize) -> Duration {
        let per_second = self.samples_per_second();
        if per_second == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(samples as f64 / per_second as f64)
    }
}

/// What to do when a clip's format differs from its stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FormatPolicy {
    /// Convert the clip to the stream format.
    #[default]
    Resample,
    /// Refuse the clip with [`AudioError::FormatMismatch`].
    Reject,
}

/// Audio produced by synthesis or captured from a device.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Interleaved PCM f32 samples.
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl AudioClip {
    pub const fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    pub const fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration(&self) -> Duration {
        self.format().duration_of(self.samples.len())
    }

    /// Return this clip in `target` format according to `policy`.
    pub fn conform(self, target: AudioFormat, policy: FormatPolicy) -> Result<Self, AudioError> {
        if self.format() == target {
            return Ok(self);
        }
        if policy == FormatPolicy::Reject {
            return Err(AudioError::FormatMismatch {
                clip_rate: self.sample_rate,
                clip_channels: self.channels,
                stream_rate: target.sample_rate,
                stream_channels: target.channels,
            });
        }
        self.convert(target)
    }

    /// Convert to `target` (channel mix first, then resample).
    pub fn convert(self, target: AudioFormat) -> Result<Self, AudioError> {
        if self.channels == 0 || target.channels == 0 {
            return Err(AudioError::InvalidArgument("channel count must be > 0".into()));
        }
        if self.sample_rate == 0 || target.sample_rate == 0 {
            return Err(AudioError::InvalidArgument("sample rate must be > 0".into()));
        }

        let mixed = remix(&self.samples, self.channels, target.channels);
        let samples = if self.sample_rate == target.sample_rate {
            mixed
        } else {
            resample(&mixed, target.channels, self.sample_rate, target.sample_rate)?
        };

        Ok(Self::new(samples, target.sample_rate, target.channels))
    }
}

/// Convert interleaved audio between channel counts.
///
/// Down-mixing averages each frame to mono and, when the target has more
/// than one channel, copies that average to every output channel. Mono
/// up-mixing duplicates the single channel.
pub fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    if from == to {
        return samples.to_vec();
    }
    let from = from as usize;
    let to = to as usize;

    samples
        .chunks_exact(from)
        .flat_map(|frame| {
            #[allow(clippy::cast_precision_loss)]
            let mono = frame.iter().sum::<f32>() / from as f32;
            std::iter::repeat_n(mono, to)
        })
        .collect()
}

/// Resample interleaved audio using FFT-based resampling.
pub fn resample(
    samples: &[f32],
    channels: u16,
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f32>, AudioError> {
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }

    let channels = channels as usize;
    let chunk_size = 1024;

    let mut resampler = FftFixedIn::<f32>::new(
        from_rate as usize,
        to_rate as usize,
        chunk_size,
        2, // sub-chunks for quality
        channels,
    )
    .map_err(|e| AudioError::Resample(e.to_string()))?;

    // De-interleave into one buffer per channel.
    let frames = samples.len() / channels;
    let mut planar: Vec<Vec<f32>> = vec![Vec::with_capacity(frames); channels];
    for frame in samples.chunks_exact(channels) {
        for (ch, sample) in frame.iter().enumerate() {
            planar[ch].push(*sample);
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let expected = (frames as f64 * f64::from(to_rate) / f64::from(from_rate)).ceil() as usize;
    let delay = resampler.output_delay();
    let resample_err = |e: rubato::ResampleError| AudioError::Resample(e.to_string());

    let mut output: Vec<Vec<f32>> = vec![Vec::new(); channels];
    let append = |output: &mut Vec<Vec<f32>>, result: Vec<Vec<f32>>| {
        for (out, res) in output.iter_mut().zip(result) {
            out.extend_from_slice(&res);
        }
    };

    let mut pos = 0;
    while pos + chunk_size <= frames {
        let chunk: Vec<&[f32]> = planar.iter().map(|c| &c[pos..pos + chunk_size]).collect();
        let result = resampler.process(chunk.as_slice(), None).map_err(resample_err)?;
        append(&mut output, result);
        pos += chunk_size;
    }
    if pos < frames {
        let tail: Vec<&[f32]> = planar.iter().map(|c| &c[pos..]).collect();
        let result = resampler
            .process_partial(Some(tail.as_slice()), None)
            .map_err(resample_err)?;
        append(&mut output, result);
    }

    // Flush what is still inside the filter, then drop its leading delay.
    while output[0].len() < delay + expected {
        let result = resampler
            .process_partial(None::<&[Vec<f32>]>, None)
            .map_err(resample_err)?;
        if result.first().is_none_or(Vec::is_empty) {
            break;
        }
        append(&mut output, result);
    }
    for out in &mut output {
        out.drain(..delay.min(out.len()));
        out.truncate(expected);
    }

    // Re-interleave.
    let out_frames = output.iter().map(Vec::len).min().unwrap_or(0);
    let mut interleaved = Vec::with_capacity(out_frames * channels);
    for i in 0..out_frames {
        for channel in &output {
            interleaved.push(channel[i]);
        }
    }
    Ok(interleaved)
}
