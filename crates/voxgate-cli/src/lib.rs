#![doc = include_str!(concat!(env!("OUT_DIR"), "/README_GENERATED.md"))]
#![deny(unused_crate_dependencies)]

// Used by the binary target only.
use anyhow as _;
use dotenvy as _;

pub mod commands;
pub mod context;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod parser;

pub use commands::{Commands, LocksCommand, SpeakArgs};
pub use context::CliContext;
pub use error::CliError;
pub use logging::LogTarget;
pub use parser::Cli;
