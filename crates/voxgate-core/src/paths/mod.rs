//! Path utilities for voxgate data, socket, lock and log locations.
//!
//! # Design
//!
//! - Resolution is a pure function of an environment lookup ([`ResolvedPaths::from_lookup`]),
//!   so tests never touch the process environment
//! - Returns `PathBuf` and `PathError` for clear error handling
//! - Nothing is created on disk until [`ensure_directory`] is called

mod error;
mod resolver;

pub use error::PathError;
pub use resolver::{
    DATA_DIR_ENV, LOG_FILE_ENV, ResolvedPaths, SOCKET_ENV, daemon_log_path, data_root,
    ensure_directory, event_log_path, locks_dir, socket_path,
};
