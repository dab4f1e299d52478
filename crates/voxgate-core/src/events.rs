//! Observability records appended to the event log (one JSON object per line).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where the voice used for an utterance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum VoiceSource {
    /// The request named the backend that spoke.
    Request,
    /// The request named no backend; the chain's first available one spoke.
    Default,
    /// The requested backend was unavailable and another one spoke.
    Fallback,
}

/// One line in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    /// Producer event kind (hook name), e.g. `"stop"` or `"notification"`.
    pub event: String,
    pub text_length: usize,
    pub backend: Option<String>,
    pub voice_id: Option<String>,
    pub voice_source: VoiceSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let record = EventRecord {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            event: "stop".into(),
            text_length: 12,
            backend: Some("espeak-ng".into()),
            voice_id: None,
            voice_source: VoiceSource::Default,
            agent_id: None,
            duration_ms: None,
            success: true,
            error: None,
        };
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();

        assert_eq!(obj["sessionId"], "s1");
        assert_eq!(obj["textLength"], 12);
        assert_eq!(obj["voiceSource"], "default");
        assert!(obj["voiceId"].is_null());
        assert!(!obj.contains_key("agentId"));
        assert!(!obj.contains_key("durationMs"));
        assert!(!obj.contains_key("error"));
    }
}
