//! Fallback lock keys.
//!
//! A lock covers one logical event: the same `(session, event kind, agent)`
//! triple firing twice in quick succession maps to the same file.

use std::fmt;
use std::fmt::Write as _;

use sha2::{Digest, Sha256};

/// Longest component kept in a lock file name.
const MAX_COMPONENT_LEN: usize = 64;

/// Digest bytes appended to the readable part of a lock file name.
const DIGEST_BYTES: usize = 8;

/// Identity of a fallback speaker lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockKey {
    pub session_id: String,
    pub event_kind: String,
    pub agent_id: Option<String>,
}

impl LockKey {
    pub fn new(
        session_id: impl Into<String>,
        event_kind: impl Into<String>,
        agent_id: Option<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            event_kind: event_kind.into(),
            agent_id,
        }
    }

    /// File name for this key inside the locks directory.
    ///
    /// The readable part reduces components to `[A-Za-z0-9_-]`, truncates
    /// them and joins them with `__` (a missing agent reads `main`). The
    /// hex suffix is a digest of the raw triple, so keys that sanitize to
    /// the same text still get distinct files.
    pub fn file_name(&self) -> String {
        format!(
            "{}__{}__{}-{}.lock",
            sanitize(&self.session_id),
            sanitize(&self.event_kind),
            self.agent_id.as_deref().map_or_else(|| "main".to_string(), sanitize),
            self.digest(),
        )
    }

    /// Hex digest of the unsanitized triple.
    ///
    /// Every field is length-prefixed and the agent carries a presence tag.
    fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for part in [&self.session_id, &self.event_kind] {
            hasher.update((part.len() as u64).to_le_bytes());
            hasher.update(part.as_bytes());
        }
        match &self.agent_id {
            None => hasher.update([0u8]),
            Some(agent) => {
                hasher.update([1u8]);
                hasher.update((agent.len() as u64).to_le_bytes());
                hasher.update(agent.as_bytes());
            }
        }
        hasher.finalize()[..DIGEST_BYTES]
            .iter()
            .fold(String::with_capacity(DIGEST_BYTES * 2), |mut out, b| {
                let _ = write!(out, "{b:02x}");
                out
            })
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session_id, self.event_kind)?;
        if let Some(agent) = &self.agent_id {
            write!(f, "/{agent}")?;
        }
        Ok(())
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_COMPONENT_LEN)
        .collect();

    if cleaned.is_empty() {
        "none".to_string()
    } else {
        cleaned
    }
}
