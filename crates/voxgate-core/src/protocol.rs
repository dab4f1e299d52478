//! Producer-to-daemon wire protocol.
//!
//! One JSON object per line over a Unix domain socket. Requests carry an
//! `op` tag; replies carry an `op` tag too, except the enqueue reply which is
//! a bare `{ "id": ... }` object.
//!
//! ```text
//! → {"op":"enqueue","text":"Build done","priority":"HIGH","voiceConfig":{},"sessionId":"s1"}
//! ← {"id":"6f1c..."}
//! → {"op":"waitForGrant","id":"6f1c...","timeoutMs":30000}
//! ← {"op":"granted","id":"6f1c..."}
//! → {"op":"reportComplete","id":"6f1c...","durationMs":840}
//! ← {"op":"ok"}
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, SpeakError};
use crate::queue::{ItemId, ItemState, Priority, VoiceConfig};

/// Body of an `enqueue` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueRequest {
    pub text: String,
    pub priority: Priority,
    #[serde(default)]
    pub voice_config: VoiceConfig,
    #[serde(default)]
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// A request line sent by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Request {
    Enqueue(EnqueueRequest),
    WaitForGrant { id: ItemId, timeout_ms: u64 },
    ReportComplete { id: ItemId, duration_ms: u64 },
    ReportFailed { id: ItemId, reason: String },
    Status,
    Ping,
}

impl Request {
    /// Short operation name for logs.
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Enqueue(_) => "enqueue",
            Self::WaitForGrant { .. } => "waitForGrant",
            Self::ReportComplete { .. } => "reportComplete",
            Self::ReportFailed { .. } => "reportFailed",
            Self::Status => "status",
            Self::Ping => "ping",
        }
    }
}

/// Queue entry as shown in a status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub id: ItemId,
    pub priority: Priority,
    pub state: ItemState,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub text_length: usize,
    pub enqueued_at: DateTime<Utc>,
    /// 0 for the active item, 1.. for pending items in grant order.
    pub position: usize,
}

/// Point-in-time view of the daemon queue.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    #[serde(default)]
    pub active: Option<ItemSummary>,
    #[serde(default)]
    pub pending: Vec<ItemSummary>,
    pub completed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub reclaimed: u64,
}

/// A reply line carrying an `op` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    Granted { id: ItemId },
    Timeout,
    #[serde(rename = "ok")]
    Ack,
    Error { kind: ErrorKind, message: String },
    Status(StatusSnapshot),
    Pong { pid: u32, version: String },
}

impl Reply {
    pub fn error(err: &SpeakError) -> Self {
        let message = match err {
            SpeakError::Timeout(ms) => ms.to_string(),
            other => other.to_string(),
        };
        Self::Error {
            kind: err.kind(),
            message,
        }
    }
}

/// Reply to `enqueue`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueued {
    pub id: ItemId,
}

/// Any line the daemon may send.
///
/// `Reply` is tried first so an `error` reply to `enqueue` is not mistaken
/// for an `Enqueued` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Reply(Reply),
    Enqueued(Enqueued),
}

impl From<Reply> for Response {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

/// Errors encoding or decoding protocol lines.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Line was not valid JSON for the expected message type.
    #[error("Malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Line exceeded [`MAX_LINE_BYTES`]; carries the length seen so far.
    #[error("Message too long (over {max} bytes)", max = MAX_LINE_BYTES)]
    TooLong(usize),

    /// A well-formed reply that does not answer the request that was sent.
    #[error("Unexpected reply to {op}: {reply}")]
    UnexpectedReply { op: &'static str, reply: String },
}

impl From<ProtocolError> for SpeakError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Malformed(_) | ProtocolError::TooLong(_) => {
                Self::InvalidRequest(err.to_string())
            }
            ProtocolError::UnexpectedReply { .. } => Self::DaemonUnreachable(err.to_string()),
        }
    }
}

/// Upper bound on a single protocol line.
pub const MAX_LINE_BYTES: usize = 256 * 1024;

/// Serialize a message as one newline-terminated line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse a request line received by the daemon.
pub fn decode_request(line: &str) -> Result<Request, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLong(line.len()));
    }
    Ok(serde_json::from_str(line.trim())?)
}

/// Parse a reply line received by a client.
pub fn decode_response(line: &str) -> Result<Response, ProtocolError> {
    if line.len() > MAX_LINE_BYTES {
        return Err(ProtocolError::TooLong(line.len()));
    }
    Ok(serde_json::from_str(line.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn enqueue_request_matches_wire_shape() {
        let line = r#"{"op":"enqueue","text":"hi","priority":"HIGH","voiceConfig":{"backend":"espeak-ng"},"sessionId":"s1","agentId":"a7"}"#;
        let Request::Enqueue(req) = decode_request(line).unwrap() else {
            panic!("expected enqueue");
        };
        assert_eq!(req.text, "hi");
        assert_eq!(req.priority, Priority::High);
        assert_eq!(req.voice_config.backend.as_deref(), Some("espeak-ng"));
        assert_eq!(req.agent_id.as_deref(), Some("a7"));
    }

    #[test]
    fn enqueue_rejects_unknown_priority() {
        let line = r#"{"op":"enqueue","text":"hi","priority":"URGENT","sessionId":"s1"}"#;
        assert!(matches!(
            decode_request(line),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn wait_for_grant_uses_camel_case_fields() {
        let id = ItemId::new();
        let value = serde_json::to_value(Request::WaitForGrant {
            id,
            timeout_ms: 500,
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"op": "waitForGrant", "id": id.to_string(), "timeoutMs": 500})
        );
    }

    #[test]
    fn replies_serialize_with_op_tag() {
        assert_eq!(
            serde_json::to_value(Reply::Timeout).unwrap(),
            json!({"op": "timeout"})
        );
        assert_eq!(serde_json::to_value(Reply::Ack).unwrap(), json!({"op": "ok"}));
        let err = Reply::error(&SpeakError::invalid_request("text is empty"));
        assert_eq!(
            serde_json::to_value(err).unwrap(),
            json!({"op": "error", "kind": "invalidRequest", "message": "Invalid request: text is empty"})
        );
    }

    #[test]
    fn response_distinguishes_enqueued_from_tagged_replies() {
        let id = ItemId::new();
        let enqueued = decode_response(&format!(r#"{{"id":"{id}"}}"#)).unwrap();
        assert_eq!(enqueued, Response::Enqueued(Enqueued { id }));

        let granted = decode_response(&format!(r#"{{"op":"granted","id":"{id}"}}"#)).unwrap();
        assert_eq!(granted, Response::Reply(Reply::Granted { id }));
    }

    #[test]
    fn encode_line_is_newline_terminated() {
        let line = encode_line(&Request::Ping).unwrap();
        assert_eq!(line, "{\"op\":\"ping\"}\n");
    }

    #[test]
    fn oversized_lines_are_rejected() {
        let line = "x".repeat(MAX_LINE_BYTES + 1);
        assert!(matches!(decode_request(&line), Err(ProtocolError::TooLong(_))));
    }
}
