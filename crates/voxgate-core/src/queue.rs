//! Speech queue domain types.
//!
//! A [`QueueItem`] moves through `queued → granted → completed | failed |
//! abandoned`, and may also jump from `queued` straight to `abandoned`
//! (timeout, disconnect). Transitions never go backwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Scheduling priority of a speech request.
///
/// Ordering follows urgency: `Low < Normal < High`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
        })
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "NORMAL" => Ok(Self::Normal),
            "HIGH" => Ok(Self::High),
            other => Err(format!("unknown priority '{other}' (expected LOW, NORMAL or HIGH)")),
        }
    }
}

/// Opaque identifier assigned to a queue item at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(Uuid);

impl ItemId {
    /// Generate a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ItemId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    Queued,
    Granted,
    Completed,
    Failed,
    Abandoned,
}

impl ItemState {
    /// Terminal states are never left again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Abandoned)
    }

    /// Whether `self → next` is a legal forward transition.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Granted | Self::Abandoned)
                | (Self::Granted, Self::Completed | Self::Failed | Self::Abandoned)
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Queued => "queued",
            Self::Granted => "granted",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Abandoned => "abandoned",
        })
    }
}

/// Rejected state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Illegal queue item transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: ItemState,
    pub to: ItemState,
}

/// Voice selection carried with a request.
///
/// The daemon never interprets it; it is stored and echoed back in status
/// snapshots. Producers use it to pick a backend and voice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    /// Preferred backend name (e.g. `"espeak-ng"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,

    /// Backend-specific voice identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,

    /// Free-form per-backend synthesis settings (rate, pitch, ...).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl VoiceConfig {
    pub fn is_empty(&self) -> bool {
        self.backend.is_none() && self.voice_id.is_none() && self.settings.is_empty()
    }
}

/// A pending speech request as held by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: ItemId,
    pub text: String,
    pub priority: Priority,
    pub voice_config: VoiceConfig,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// Monotonic arrival counter; breaks ties between equal priorities.
    pub seq: u64,
    pub state: ItemState,
}

impl QueueItem {
    /// Move to `next`, refusing any backwards or sideways transition.
    pub fn transition(&mut self, next: ItemState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Text length in characters, as reported in logs and status.
    pub fn text_length(&self) -> usize {
        self.text.chars().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item() -> QueueItem {
        QueueItem {
            id: ItemId::new(),
            text: "hello".into(),
            priority: Priority::Normal,
            voice_config: VoiceConfig::default(),
            session_id: "s1".into(),
            agent_id: None,
            enqueued_at: Utc::now(),
            seq: 0,
            state: ItemState::Queued,
        }
    }

    #[test]
    fn priority_orders_by_urgency() {
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Normal > Priority::Low);
    }

    #[test]
    fn priority_wire_form_is_upper_case() {
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
        let parsed: Priority = serde_json::from_str("\"LOW\"").unwrap();
        assert_eq!(parsed, Priority::Low);
        assert!(serde_json::from_str::<Priority>("\"URGENT\"").is_err());
    }

    #[test]
    fn priority_parses_case_insensitively() {
        assert_eq!("high".parse::<Priority>().unwrap(), Priority::High);
        assert!("urgent".parse::<Priority>().is_err());
    }

    #[test]
    fn transitions_are_monotonic() {
        let mut it = item();
        it.transition(ItemState::Granted).unwrap();
        it.transition(ItemState::Completed).unwrap();

        let err = it.transition(ItemState::Queued).unwrap_err();
        assert_eq!(err.from, ItemState::Completed);
        assert!(it.transition(ItemState::Granted).is_err());
    }

    #[test]
    fn queued_item_cannot_complete_without_grant() {
        let mut it = item();
        assert!(it.transition(ItemState::Completed).is_err());
        assert!(it.transition(ItemState::Failed).is_err());
        it.transition(ItemState::Abandoned).unwrap();
        assert!(it.state.is_terminal());
    }

    #[test]
    fn item_id_round_trips_through_string() {
        let id = ItemId::new();
        let parsed: ItemId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }
}
