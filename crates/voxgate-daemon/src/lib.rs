#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod server;

pub use config::DaemonConfig;
pub use coordinator::{Coordinator, GrantOutcome};
pub use error::DaemonError;
pub use queue::{ConnectionId, QueueError, SpeechQueue};
pub use server::{DaemonServer, run_until_signalled};
