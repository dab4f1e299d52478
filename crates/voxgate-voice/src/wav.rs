//! WAV encoding and decoding for backend I/O.

use std::io::Cursor;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

use crate::clip::AudioClip;
use crate::error::BackendError;

/// Decode a complete WAV byte buffer into an [`AudioClip`].
///
/// Programs writing WAV to a pipe (e.g. `espeak-ng --stdout`) cannot seek
/// back to patch the header, so the declared data length is often larger
/// than what follows. Decoding stops at the first truncated sample instead
/// of failing, as long as at least the header was valid.
pub fn decode(bytes: &[u8]) -> Result<AudioClip, BackendError> {
    let reader = WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();

    let samples: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader.into_samples::<f32>().map_while(Result::ok).collect(),
        SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .into_samples::<i32>()
                .map_while(Result::ok)
                .map(|s| {
                    #[allow(clippy::cast_precision_loss)]
                    let s = s as f32;
                    s / scale
                })
                .collect()
        }
    };

    Ok(AudioClip::new(samples, spec.sample_rate, spec.channels))
}

/// Encode a clip as 16-bit PCM WAV (the format speech recognizers expect).
pub fn encode_pcm16(clip: &AudioClip) -> Result<Vec<u8>, BackendError> {
    let spec = WavSpec {
        channels: clip.channels,
        sample_rate: clip.sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &sample in &clip.samples {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16;
            writer.write_sample(value)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_survives_encode_decode() {
        let clip = AudioClip::new(vec![0.0, 0.5, -0.5, 1.0], 16_000, 1);
        let bytes = encode_pcm16(&clip).unwrap();
        let decoded = decode(&bytes).unwrap();

        assert_eq!(decoded.sample_rate, 16_000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.samples.len(), 4);
        for (a, b) in clip.samples.iter().zip(&decoded.samples) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn truncated_stream_header_still_decodes() {
        let clip = AudioClip::new(vec![0.25; 100], 22_050, 1);
        let mut bytes = encode_pcm16(&clip).unwrap();
        // Drop the last 10 samples but keep the header's declared length.
        bytes.truncate(bytes.len() - 20);

        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.samples.len(), 90);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(decode(b"not a wav"), Err(BackendError::Wav(_))));
    }
}
