//! Connection to the coordination daemon.
//!
//! Every round trip carries its own deadline, so a daemon that accepts but
//! never answers costs the caller at most that deadline.

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;
use voxgate_core::protocol::{Enqueued, ProtocolError, decode_response, encode_line};
use voxgate_core::{
    EnqueueRequest, ItemId, Reply, Request, Response, SpeakError, StatusSnapshot,
};

/// One open producer connection.
pub struct DaemonClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    /// Deadline for round trips other than `waitForGrant`.
    request_timeout: Duration,
}

impl DaemonClient {
    /// Connect, failing with [`SpeakError::DaemonUnreachable`].
    pub async fn connect(path: &Path, timeout: Duration) -> Result<Self, SpeakError> {
        let stream = match tokio::time::timeout(timeout, UnixStream::connect(path)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(SpeakError::unreachable(format!("{}: {e}", path.display())));
            }
            Err(_) => {
                return Err(SpeakError::unreachable(format!(
                    "{}: connect timed out",
                    path.display()
                )));
            }
        };
        let (read, writer) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            writer,
            request_timeout: timeout.max(Duration::from_secs(2)),
        })
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub async fn enqueue(&mut self, request: EnqueueRequest) -> Result<ItemId, SpeakError> {
        match self
            .round_trip(&Request::Enqueue(request), self.request_timeout)
            .await?
        {
            Response::Enqueued(Enqueued { id }) => Ok(id),
            Response::Reply(reply) => Err(unexpected("enqueue", reply)),
        }
    }

    /// Block until granted.
    ///
    /// A `timeout` reply and a daemon that stays silent past
    /// `timeout + grace` both yield [`SpeakError::Timeout`].
    pub async fn wait_for_grant(
        &mut self,
        id: ItemId,
        timeout: Duration,
        grace: Duration,
    ) -> Result<(), SpeakError> {
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let request = Request::WaitForGrant { id, timeout_ms };
        match self.round_trip(&request, timeout + grace).await? {
            Response::Reply(Reply::Granted { id: granted }) if granted == id => Ok(()),
            Response::Reply(Reply::Timeout) => Err(SpeakError::Timeout(timeout_ms)),
            Response::Reply(reply) => Err(unexpected("waitForGrant", reply)),
            Response::Enqueued(_) => Err(ProtocolError::UnexpectedReply {
                op: "waitForGrant",
                reply: "enqueued".into(),
            }
            .into()),
        }
    }

    pub async fn report_complete(&mut self, id: ItemId, duration: Duration) -> Result<(), SpeakError> {
        let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.expect_ack(&Request::ReportComplete { id, duration_ms }, "reportComplete")
            .await
    }

    pub async fn report_failed(&mut self, id: ItemId, reason: &str) -> Result<(), SpeakError> {
        let request = Request::ReportFailed {
            id,
            reason: reason.to_string(),
        };
        self.expect_ack(&request, "reportFailed").await
    }

    pub async fn status(&mut self) -> Result<StatusSnapshot, SpeakError> {
        match self.round_trip(&Request::Status, self.request_timeout).await? {
            Response::Reply(Reply::Status(snapshot)) => Ok(snapshot),
            Response::Reply(reply) => Err(unexpected("status", reply)),
            Response::Enqueued(_) => Err(SpeakError::unreachable("status answered with an id")),
        }
    }

    /// Daemon pid and version.
    pub async fn ping(&mut self) -> Result<(u32, String), SpeakError> {
        match self.round_trip(&Request::Ping, self.request_timeout).await? {
            Response::Reply(Reply::Pong { pid, version }) => Ok((pid, version)),
            Response::Reply(reply) => Err(unexpected("ping", reply)),
            Response::Enqueued(_) => Err(SpeakError::unreachable("ping answered with an id")),
        }
    }

    async fn expect_ack(&mut self, request: &Request, op: &'static str) -> Result<(), SpeakError> {
        match self.round_trip(request, self.request_timeout).await? {
            Response::Reply(Reply::Ack) => Ok(()),
            Response::Reply(reply) => Err(unexpected(op, reply)),
            Response::Enqueued(_) => Err(SpeakError::unreachable(format!("{op} answered with an id"))),
        }
    }

    /// Send one line and read one line back.
    ///
    /// A closed socket means the daemon died ([`SpeakError::DaemonUnreachable`]);
    /// a missed deadline means it is alive but stuck ([`SpeakError::Timeout`]).
    async fn round_trip(&mut self, request: &Request, deadline: Duration) -> Result<Response, SpeakError> {
        let line = encode_line(request)?;
        let exchange = async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.flush().await?;
            self.lines.next_line().await
        };

        let reply = match tokio::time::timeout(deadline, exchange).await {
            Ok(Ok(Some(reply))) => reply,
            Ok(Ok(None)) => return Err(SpeakError::unreachable("daemon closed the connection")),
            Ok(Err(e)) => return Err(SpeakError::unreachable(e.to_string())),
            Err(_) => {
                debug!(op = request.op(), ?deadline, "Daemon did not answer in time");
                return Err(SpeakError::Timeout(
                    u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                ));
            }
        };

        let response = decode_response(&reply)?;
        if let Response::Reply(Reply::Error { kind, message }) = response {
            return Err(SpeakError::from_wire(kind, message));
        }
        Ok(response)
    }
}

fn unexpected(op: &'static str, reply: Reply) -> SpeakError {
    ProtocolError::UnexpectedReply {
        op,
        reply: format!("{reply:?}"),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// A daemon that reads requests and answers each with `reply`.
    fn fake_daemon(listener: UnixListener, reply: &'static str) {
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                if reply.is_empty() {
                    continue;
                }
                write.write_all(reply.as_bytes()).await.unwrap();
                write.write_all(b"\n").await.unwrap();
            }
        });
    }

    #[tokio::test]
    async fn missing_socket_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let err = DaemonClient::connect(&dir.path().join("none.sock"), Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(err.falls_back_to_lock());
    }

    #[tokio::test]
    async fn error_replies_become_speak_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        fake_daemon(
            UnixListener::bind(&path).unwrap(),
            r#"{"op":"error","kind":"invalidRequest","message":"queue full (64 items)"}"#,
        );

        let mut client = DaemonClient::connect(&path, Duration::from_secs(1)).await.unwrap();
        let err = client
            .enqueue(EnqueueRequest {
                text: "hi".into(),
                priority: voxgate_core::Priority::Normal,
                voice_config: voxgate_core::VoiceConfig::default(),
                session_id: "s".into(),
                agent_id: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err, SpeakError::invalid_request("queue full (64 items)"));
    }

    #[tokio::test]
    async fn silent_daemon_cannot_hold_a_wait_past_the_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        fake_daemon(UnixListener::bind(&path).unwrap(), "");

        let mut client = DaemonClient::connect(&path, Duration::from_secs(1)).await.unwrap();
        let started = std::time::Instant::now();
        let err = client
            .wait_for_grant(ItemId::new(), Duration::from_millis(300), Duration::from_millis(200))
            .await
            .unwrap_err();

        assert!(matches!(err, SpeakError::Timeout(_)));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn closed_connection_is_unreachable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.sock");
        let listener = UnixListener::bind(&path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let mut client = DaemonClient::connect(&path, Duration::from_secs(1)).await.unwrap();
        let err = client.ping().await.unwrap_err();
        assert!(err.falls_back_to_lock());
    }
}
