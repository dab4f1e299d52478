//! Audio and backend error types.

use voxgate_core::SpeakError;

use crate::stream::StreamState;

/// Errors from the audio buffer manager and device drivers.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    /// No output (or input) device matching the request.
    #[error("No suitable audio device: {0}")]
    DeviceUnavailable(String),

    /// The device refused to open or start a stream.
    #[error("Failed to open audio stream: {0}")]
    StreamOpen(String),

    /// A speech playback (or recording) stream is already open in this process.
    #[error("A {0} stream is already open in this process")]
    StreamBusy(&'static str),

    /// Operation not valid in the stream's current state.
    #[error("Cannot {op} a stream in state {state}")]
    InvalidState { op: &'static str, state: StreamState },

    /// Caller passed an out-of-range value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Clip format differs from the stream and the policy forbids conversion.
    #[error("Format mismatch: clip is {clip_rate} Hz/{clip_channels}ch, stream is {stream_rate} Hz/{stream_channels}ch")]
    FormatMismatch {
        clip_rate: u32,
        clip_channels: u16,
        stream_rate: u32,
        stream_channels: u16,
    },

    /// Audio resampling error.
    #[error("Audio resampling failed: {0}")]
    Resample(String),

    /// Under/overruns exceeded the recoverable threshold.
    #[error("Too many buffer glitches ({underruns} underruns, {overruns} overruns)")]
    Glitches { underruns: u64, overruns: u64 },

    /// Buffered audio did not finish playing in time.
    #[error("Drain timed out with {remaining} samples still buffered")]
    DrainTimeout { remaining: usize },

    /// The thread owning the device went away.
    #[error("Audio device thread exited unexpectedly")]
    DeviceThreadDied,
}

impl AudioError {
    pub fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub fn stream_open(msg: impl Into<String>) -> Self {
        Self::StreamOpen(msg.into())
    }
}

impl From<AudioError> for SpeakError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::DeviceUnavailable(_) | AudioError::StreamOpen(_) => {
                Self::DeviceUnavailable(err.to_string())
            }
            AudioError::InvalidArgument(_) => Self::InvalidRequest(err.to_string()),
            _ => Self::PlaybackFailure(err.to_string()),
        }
    }
}

/// Errors from synthesis and recognition backends.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No registered backend passed its availability check.
    #[error("No speech backend available")]
    NoBackendAvailable,

    /// The backend ran but produced no usable audio.
    #[error("{backend}: synthesis failed: {reason}")]
    Synthesis { backend: String, reason: String },

    /// The recognizer ran but produced no transcript.
    #[error("{backend}: transcription failed: {reason}")]
    Transcription { backend: String, reason: String },

    /// Input exceeds the backend's limit.
    #[error("{backend}: input of {len} characters exceeds limit of {max}")]
    InputTooLong {
        backend: String,
        len: usize,
        max: usize,
    },

    /// Returned audio could not be decoded.
    #[error("Invalid WAV data: {0}")]
    Wav(#[from] hound::Error),

    /// Backend process or temp file I/O.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Playing the synthesized clip failed.
    #[error(transparent)]
    Playback(#[from] AudioError),
}

impl BackendError {
    pub fn synthesis(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Synthesis {
            backend: backend.into(),
            reason: reason.into(),
        }
    }

    pub fn transcription(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Transcription {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

impl From<BackendError> for SpeakError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NoBackendAvailable => Self::NoBackendAvailable,
            BackendError::Playback(audio) => audio.into(),
            other => Self::SynthesisFailure(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_errors_map_to_speak_taxonomy() {
        let err: SpeakError = AudioError::device_unavailable("no output").into();
        assert!(matches!(err, SpeakError::DeviceUnavailable(_)));

        let err: SpeakError = AudioError::Glitches {
            underruns: 40,
            overruns: 0,
        }
        .into();
        assert!(matches!(err, SpeakError::PlaybackFailure(_)));
    }

    #[test]
    fn backend_errors_map_to_speak_taxonomy() {
        let err: SpeakError = BackendError::NoBackendAvailable.into();
        assert_eq!(err, SpeakError::NoBackendAvailable);

        let err: SpeakError = BackendError::synthesis("espeak-ng", "exit 1").into();
        assert!(matches!(err, SpeakError::SynthesisFailure(_)));

        let err: SpeakError = BackendError::Playback(AudioError::DeviceThreadDied).into();
        assert!(matches!(err, SpeakError::PlaybackFailure(_)));
    }
}
