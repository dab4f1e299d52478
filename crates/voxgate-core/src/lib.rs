#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod error;
pub mod events;
pub mod lock;
pub mod paths;
pub mod protocol;
pub mod queue;
pub mod settings;

// Re-export key types for convenience
pub use error::{ErrorKind, SpeakError};
pub use events::{EventRecord, VoiceSource};
pub use lock::LockKey;
pub use protocol::{
    EnqueueRequest, ItemSummary, ProtocolError, Reply, Request, Response, StatusSnapshot,
};
pub use queue::{InvalidTransition, ItemId, ItemState, Priority, QueueItem, VoiceConfig};
pub use settings::{Settings, SettingsError, validate_settings};

/// Crate version reported by the daemon in `pong` replies.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
