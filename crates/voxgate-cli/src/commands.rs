//! Subcommands.

use std::path::PathBuf;

use clap::{Args, Subcommand};
use voxgate_core::Priority;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the coordination daemon
    Daemon {
        /// Log to stderr instead of the daemon log file
        #[arg(long)]
        foreground: bool,
    },

    /// Speak text when it is this producer's turn
    Speak(SpeakArgs),

    /// Show the daemon's active item, queue and counters
    Status {
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// List speech backends and whether each is available
    Backends,

    /// List audio output and input devices
    Devices,

    /// Transcribe a WAV file with the first available recognizer
    Transcribe {
        /// WAV file to transcribe
        file: PathBuf,
    },

    /// Inspect or clean fallback speaker locks
    Locks {
        #[command(subcommand)]
        command: LocksCommand,
    },

    /// Show resolved socket, data and log paths
    Paths,
}

#[derive(Debug, Args)]
pub struct SpeakArgs {
    /// Text to speak; read from stdin when omitted
    pub text: Option<String>,

    /// LOW, NORMAL or HIGH
    #[arg(short, long, default_value = "NORMAL")]
    pub priority: Priority,

    /// Originating session
    #[arg(long, env = "VOXGATE_SESSION_ID", default_value = "default")]
    pub session: String,

    /// Event kind that triggered this utterance (hook name)
    #[arg(long, default_value = "manual")]
    pub event: String,

    /// Originating sub-agent
    #[arg(long)]
    pub agent: Option<String>,

    /// Preferred synthesis backend
    #[arg(long)]
    pub backend: Option<String>,

    /// Voice identifier passed to the backend
    #[arg(long)]
    pub voice: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum LocksCommand {
    /// List lock files with age and staleness
    List,
    /// Remove stale lock files
    Clean,
}
