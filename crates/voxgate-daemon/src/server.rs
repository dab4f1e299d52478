//! Unix socket server.
//!
//! One task per connection reads request lines and writes one reply line per
//! request. A `waitForGrant` parks the connection, but the task keeps reading
//! so a producer that dies mid-wait is noticed and its items are dropped.
//!
//! Lines are framed with a bounded [`LinesCodec`]: an oversized request gets
//! an error reply without ever being buffered whole.
//!
//! On shutdown the coordinator is frozen before any connection is torn down,
//! then every connection is closed. Producers still waiting see EOF and fall
//! back to the lock path.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voxgate_core::paths::ensure_directory;
use voxgate_core::protocol::{
    Enqueued, MAX_LINE_BYTES, ProtocolError, decode_request, encode_line,
};
use voxgate_core::{Reply, Request, Response, SpeakError};

use crate::config::DaemonConfig;
use crate::coordinator::{Coordinator, GrantOutcome};
use crate::error::DaemonError;
use crate::queue::ConnectionId;

/// How long `bind` waits for an existing socket to answer.
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// A bound daemon, ready to [`run`](DaemonServer::run).
pub struct DaemonServer {
    listener: UnixListener,
    config: DaemonConfig,
    coordinator: Arc<Coordinator>,
}

impl DaemonServer {
    /// Bind the socket.
    ///
    /// A socket file nobody answers on is left over from a crashed daemon and
    /// is replaced. A live one means another daemon owns the session.
    pub async fn bind(config: DaemonConfig) -> Result<Self, DaemonError> {
        let path = config.socket_path.clone();
        if let Some(parent) = path.parent() {
            ensure_directory(parent)?;
        }

        if path.exists() {
            let probe = tokio::time::timeout(PROBE_TIMEOUT, UnixStream::connect(&path)).await;
            if matches!(probe, Ok(Ok(_))) {
                return Err(DaemonError::AlreadyRunning(path));
            }
            warn!(path = %path.display(), "Removing stale daemon socket");
            std::fs::remove_file(&path)?;
        }

        let listener =
            UnixListener::bind(&path).map_err(|source| DaemonError::Bind { path, source })?;
        info!(path = %config.socket_path.display(), "Daemon listening");

        Ok(Self {
            listener,
            coordinator: Arc::new(Coordinator::new(&config)),
            config,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub fn coordinator(&self) -> Arc<Coordinator> {
        Arc::clone(&self.coordinator)
    }

    /// Serve until `cancel` fires or the idle timeout passes, then remove the
    /// socket file.
    pub async fn run(self, cancel: CancellationToken) -> Result<(), DaemonError> {
        let Self {
            listener,
            config,
            coordinator,
        } = self;

        let supervisor = {
            let coordinator = Arc::clone(&coordinator);
            let cancel = cancel.child_token();
            tokio::spawn(async move { coordinator.supervise(cancel).await })
        };

        // Connections close only after the coordinator is frozen.
        let drain = CancellationToken::new();
        let activity = Arc::new(Activity::default());
        if let Some(idle) = config.idle_shutdown {
            tokio::spawn(watch_idle(
                idle,
                Arc::clone(&activity),
                Arc::clone(&coordinator),
                cancel.clone(),
            ));
        }

        loop {
            let accepted = tokio::select! {
                () = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, _)) => {
                    let id = ConnectionId::next();
                    debug!(conn = %id, "Connection opened");
                    let guard = activity.open();
                    let coordinator = Arc::clone(&coordinator);
                    let drain = drain.clone();
                    tokio::spawn(async move {
                        Connection::new(id, stream, coordinator).serve(drain).await;
                        drop(guard);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }

        coordinator.shut_down();
        drain.cancel();

        drop(listener);
        if let Err(e) = std::fs::remove_file(&config.socket_path) {
            debug!(error = %e, "Socket already gone");
        }
        let _ = supervisor.await;
        info!("Daemon stopped");
        Ok(())
    }
}

/// Bind and serve until SIGINT or SIGTERM.
pub async fn run_until_signalled(config: DaemonConfig) -> Result<(), DaemonError> {
    let server = DaemonServer::bind(config).await?;
    let cancel = CancellationToken::new();

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        match shutdown_signal().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!(error = %e, "Signal handler failed"),
        }
        signal_cancel.cancel();
    });

    server.run(cancel).await
}

#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

// ── Idle shutdown ──────────────────────────────────────────────────

/// Open-connection count and the moment the daemon last had work.
struct Activity {
    connections: AtomicUsize,
    last_active: std::sync::Mutex<Instant>,
}

impl Default for Activity {
    fn default() -> Self {
        Self {
            connections: AtomicUsize::new(0),
            last_active: std::sync::Mutex::new(Instant::now()),
        }
    }
}

impl Activity {
    fn open(self: &Arc<Self>) -> ConnectionGuard {
        self.connections.fetch_add(1, Ordering::SeqCst);
        self.touch();
        ConnectionGuard(Arc::clone(self))
    }

    fn touch(&self) {
        *self
            .last_active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
    }

    fn idle_since(&self) -> Option<Instant> {
        if self.connections.load(Ordering::SeqCst) > 0 {
            return None;
        }
        Some(
            *self
                .last_active
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        )
    }
}

struct ConnectionGuard(Arc<Activity>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.touch();
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn watch_idle(
    idle: Duration,
    activity: Arc<Activity>,
    coordinator: Arc<Coordinator>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval((idle / 4).max(Duration::from_millis(100)));
    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }
        if !coordinator.is_idle() {
            activity.touch();
            continue;
        }
        if let Some(since) = activity.idle_since()
            && since.elapsed() >= idle
        {
            info!(?idle, "No activity, shutting down");
            cancel.cancel();
            return;
        }
    }
}

// ── Connections ────────────────────────────────────────────────────

/// One framed line from the peer.
enum Frame {
    Line(String),
    /// Longer than [`MAX_LINE_BYTES`]; the codec skips to the next newline.
    Oversized,
}

struct Connection {
    id: ConnectionId,
    lines: FramedRead<OwnedReadHalf, LinesCodec>,
    writer: OwnedWriteHalf,
    /// Frames received while a wait was parked.
    backlog: VecDeque<Frame>,
    /// A codec error ends the stream once; polling again resumes it.
    resume_after_error: bool,
    coordinator: Arc<Coordinator>,
}

impl Connection {
    fn new(id: ConnectionId, stream: UnixStream, coordinator: Arc<Coordinator>) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            id,
            lines: FramedRead::new(read, LinesCodec::new_with_max_length(MAX_LINE_BYTES)),
            writer,
            backlog: VecDeque::new(),
            resume_after_error: false,
            coordinator,
        }
    }

    async fn serve(mut self, drain: CancellationToken) {
        loop {
            let frame = if let Some(frame) = self.backlog.pop_front() {
                frame
            } else {
                let next = tokio::select! {
                    () = drain.cancelled() => break,
                    next = self.next_frame() => next,
                };
                match next {
                    Some(frame) => frame,
                    None => break,
                }
            };

            let response: Response = match frame {
                Frame::Line(line) if line.trim().is_empty() => continue,
                Frame::Line(line) => match self.handle_line(&line).await {
                    Some(response) => response,
                    None => break,
                },
                Frame::Oversized => {
                    warn!(conn = %self.id, limit = MAX_LINE_BYTES, "Oversized request");
                    let err = ProtocolError::TooLong(MAX_LINE_BYTES + 1);
                    Reply::error(&SpeakError::from(err)).into()
                }
            };
            if let Err(e) = self.send(&response).await {
                debug!(conn = %self.id, error = %e, "Write failed");
                break;
            }
        }

        self.coordinator.disconnect(self.id);
        debug!(conn = %self.id, "Connection closed");
    }

    /// `None` once the peer has gone away.
    async fn next_frame(&mut self) -> Option<Frame> {
        loop {
            match self.lines.next().await {
                Some(Ok(line)) => return Some(Frame::Line(line)),
                Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                    self.resume_after_error = true;
                    return Some(Frame::Oversized);
                }
                Some(Err(LinesCodecError::Io(e))) => {
                    debug!(conn = %self.id, error = %e, "Read failed");
                    return None;
                }
                None if std::mem::take(&mut self.resume_after_error) => {}
                None => return None,
            }
        }
    }

    /// `None` means the connection should close: the peer went away while a
    /// wait was parked, or the daemon is shutting down.
    async fn handle_line(&mut self, line: &str) -> Option<Response> {
        let request = match decode_request(line) {
            Ok(request) => request,
            Err(e) => {
                warn!(conn = %self.id, error = %e, "Malformed request");
                return Some(Reply::error(&SpeakError::from(e)).into());
            }
        };
        debug!(conn = %self.id, op = request.op(), "Request");

        let response: Response = match request {
            Request::Enqueue(body) => match self.coordinator.enqueue(self.id, body) {
                Ok(id) => Response::Enqueued(Enqueued { id }),
                Err(e) => Reply::error(&e).into(),
            },
            Request::WaitForGrant { id, timeout_ms } => {
                match self.wait(id, Duration::from_millis(timeout_ms)).await? {
                    Ok(GrantOutcome::Granted) => Reply::Granted { id }.into(),
                    Ok(GrantOutcome::TimedOut) => Reply::Timeout.into(),
                    Ok(GrantOutcome::ShuttingDown) => {
                        debug!(conn = %self.id, %id, "Closing parked wait for shutdown");
                        return None;
                    }
                    Err(e) => Reply::error(&e).into(),
                }
            }
            Request::ReportComplete { id, duration_ms } => {
                ack(self.coordinator.report_complete(id, duration_ms))
            }
            Request::ReportFailed { id, reason } => {
                ack(self.coordinator.report_failed(id, &reason))
            }
            Request::Status => Reply::Status(self.coordinator.status()).into(),
            Request::Ping => Reply::Pong {
                pid: std::process::id(),
                version: voxgate_core::VERSION.to_string(),
            }
            .into(),
        };
        Some(response)
    }

    /// Park on the grant while still watching the socket.
    async fn wait(
        &mut self,
        id: voxgate_core::ItemId,
        timeout: Duration,
    ) -> Option<Result<GrantOutcome, SpeakError>> {
        let coordinator = Arc::clone(&self.coordinator);
        let wait = coordinator.wait_for_grant(id, timeout);
        tokio::pin!(wait);

        loop {
            tokio::select! {
                outcome = &mut wait => return Some(outcome),
                next = self.next_frame() => match next {
                    Some(frame) => self.backlog.push_back(frame),
                    None => {
                        debug!(conn = %self.id, %id, "Peer left during wait");
                        return None;
                    }
                },
            }
        }
    }

    async fn send(&mut self, response: &Response) -> std::io::Result<()> {
        let line = encode_line(response).map_err(std::io::Error::other)?;
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.flush().await
    }
}

fn ack(result: Result<(), SpeakError>) -> Response {
    match result {
        Ok(()) => Reply::Ack.into(),
        Err(e) => Reply::error(&e).into(),
    }
}
