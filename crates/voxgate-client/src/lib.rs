#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

// Only used by the integration tests.
#[cfg(test)]
use tokio_util as _;
#[cfg(test)]
use voxgate_daemon as _;

pub mod autostart;
pub mod config;
pub mod connection;
pub mod event_log;
pub mod lock;
pub mod speaker;

pub use autostart::{Launcher, ProcessLauncher, connect_or_start};
pub use config::ClientConfig;
pub use connection::DaemonClient;
pub use event_log::EventLog;
pub use lock::{LockEntry, LockError, LockGuard, LockManager};
pub use speaker::{CoordinationPath, SpeakOutcome, SpeakRequest, Speaker};
