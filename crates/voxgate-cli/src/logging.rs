//! Tracing subscriber setup.
//!
//! Three shapes, picked per command:
//!
//! | Target | Used by | Output |
//! |--------|---------|--------|
//! | [`LogTarget::Stderr`] | inspection commands, `daemon --foreground` | stderr |
//! | [`LogTarget::File`] | detached `daemon` | `daemon.log`, no ANSI |
//! | [`LogTarget::Quiet`] | `speak` | nothing unless debugging |

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    File(PathBuf),
    Quiet,
}

/// `RUST_LOG` when set, otherwise `debug` or `info`.
pub fn filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)))
}

const fn default_directive(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Install the global subscriber. Hold the returned guard until exit so the
/// file writer flushes.
pub fn init(target: &LogTarget, debug: bool) -> std::io::Result<Option<WorkerGuard>> {
    match target {
        LogTarget::Quiet if !debug => Ok(None),
        LogTarget::Quiet | LogTarget::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter(debug))
                .with_writer(std::io::stderr)
                .compact()
                .try_init()
                .ok();
            Ok(None)
        }
        LogTarget::File(path) => {
            let dir = path
                .parent()
                .map_or_else(|| PathBuf::from("."), PathBuf::from);
            std::fs::create_dir_all(&dir)?;
            let file_name = path
                .file_name()
                .map_or_else(|| "daemon.log".into(), ToOwned::to_owned);

            let appender = tracing_appender::rolling::never(&dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter(debug))
                .with_writer(writer)
                .with_ansi(false)
                .try_init()
                .ok();
            Ok(Some(guard))
        }
    }
}
