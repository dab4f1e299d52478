#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod backend;
pub mod clip;
pub mod driver;
pub mod error;
pub mod gate;
pub mod stream;
pub mod wav;

// Re-export key types for convenience
pub use backend::{
    Backend, BackendChain, BackendStatus, Capabilities, CostTier, SpeechRecognizer,
    SpeechSynthesizer, SynthesisOptions,
};
pub use clip::{AudioClip, AudioFormat, FormatPolicy};
pub use driver::{AudioDriver, DeviceInfo, DeviceStream, SystemDriver};
pub use error::{AudioError, BackendError};
pub use gate::EchoGate;
pub use stream::{
    AudioBufferManager, ClipPlayer, PlaybackOptions, PlaybackRole, RecordingOptions,
    StreamHandle, StreamHealth, StreamId, StreamKind, StreamState,
};
