//! Daemon auto-start.
//!
//! # Strategy
//! 1. Try to connect
//! 2. On failure, launch the daemon detached (own process group, null stdio)
//! 3. Retry the connection after 100 ms, 200 ms and 400 ms
//! 4. Still nothing: report the daemon unreachable so the caller falls back
//!    to lock files

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};
use voxgate_core::SpeakError;
use voxgate_core::paths::SOCKET_ENV;

use crate::config::ClientConfig;
use crate::connection::DaemonClient;

/// Delays before each reconnect attempt after a launch.
pub const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(200),
    Duration::from_millis(400),
];

/// Name of the binary that hosts the `daemon` subcommand.
const DAEMON_BINARY: &str = "voxgate";

/// Starts a daemon that will listen on a given socket.
pub trait Launcher: Send + Sync {
    fn launch(&self, socket: &Path) -> io::Result<()>;
}

/// Launches `<program> daemon` as a detached background process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    program: PathBuf,
}

impl ProcessLauncher {
    pub const fn new(program: PathBuf) -> Self {
        Self { program }
    }

    /// The configured binary, else `voxgate` on `PATH`, else this executable
    /// when it is itself a voxgate binary.
    pub fn resolve(configured: Option<&Path>) -> Option<Self> {
        if let Some(path) = configured {
            return Some(Self::new(path.to_path_buf()));
        }
        if let Ok(path) = which::which(DAEMON_BINARY) {
            return Some(Self::new(path));
        }
        std::env::current_exe()
            .ok()
            .filter(|exe| {
                exe.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| s.starts_with(DAEMON_BINARY))
            })
            .map(Self::new)
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, socket: &Path) -> io::Result<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("daemon")
            .env(SOCKET_ENV, socket)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Own process group: the daemon must survive the hook's terminal
        // going away and must not receive its Ctrl-C.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command.spawn()?;
        info!(program = %self.program.display(), pid = child.id(), "Launched daemon");
        Ok(())
    }
}

/// Connect to the daemon, launching it once if nobody answers.
pub async fn connect_or_start(
    config: &ClientConfig,
    launcher: Option<&Arc<dyn Launcher>>,
) -> Result<DaemonClient, SpeakError> {
    let first = match DaemonClient::connect(&config.socket_path, config.connect_timeout).await {
        Ok(client) => return Ok(client),
        Err(e) => e,
    };
    if config.autostart_disabled {
        return Err(first);
    }
    let Some(launcher) = launcher else {
        debug!("No daemon launcher available");
        return Err(first);
    };

    debug!(error = %first, "Daemon not answering, starting it");
    if let Err(e) = launcher.launch(&config.socket_path) {
        warn!(error = %e, "Failed to launch daemon");
        return Err(SpeakError::unreachable(format!("launch failed: {e}")));
    }

    let mut last = first;
    for (attempt, delay) in RETRY_BACKOFF.iter().enumerate() {
        tokio::time::sleep(*delay).await;
        match DaemonClient::connect(&config.socket_path, config.connect_timeout).await {
            Ok(client) => {
                debug!(attempt = attempt + 1, "Connected to freshly started daemon");
                return Ok(client);
            }
            Err(e) => last = e,
        }
    }

    warn!(
        socket = %config.socket_path.display(),
        attempts = RETRY_BACKOFF.len(),
        "Daemon did not come up"
    );
    Err(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingLauncher {
        calls: AtomicUsize,
    }

    impl Launcher for CountingLauncher {
        fn launch(&self, _socket: &Path) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn gives_up_after_three_retries() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::under(dir.path());
        let counting = Arc::new(CountingLauncher::default());
        let launcher: Arc<dyn Launcher> = counting.clone();

        let started = std::time::Instant::now();
        let err = connect_or_start(&config, Some(&launcher)).await.err().unwrap();

        assert!(err.falls_back_to_lock());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() >= Duration::from_millis(700));
    }

    #[tokio::test]
    async fn autostart_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            autostart_disabled: true,
            ..ClientConfig::under(dir.path())
        };
        let counting = Arc::new(CountingLauncher::default());
        let launcher: Arc<dyn Launcher> = counting.clone();

        assert!(connect_or_start(&config, Some(&launcher)).await.is_err());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn configured_binary_wins() {
        let launcher = ProcessLauncher::resolve(Some(Path::new("/opt/voxgate/bin/voxgate"))).unwrap();
        assert_eq!(launcher.program(), Path::new("/opt/voxgate/bin/voxgate"));
    }

    #[test]
    fn launch_failure_is_an_io_error() {
        let launcher = ProcessLauncher::new(PathBuf::from("/nonexistent/voxgate-test-binary"));
        assert!(launcher.launch(Path::new("/tmp/unused.sock")).is_err());
    }
}
