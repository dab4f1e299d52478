//! Engine-agnostic interfaces for speech synthesis and recognition.
//!
//! Producers never talk to an engine directly: they ask a [`BackendChain`]
//! for the best available one at call time. Backends are trait objects in a
//! fixed priority order; the only string dispatch is matching a preferred
//! backend by name.
//!
//! ## Shipped backends
//!
//! | Module          | Kind        | Engine                                   |
//! |-----------------|-------------|------------------------------------------|
//! | [`command`]     | synthesizer | espeak-ng, macOS `say`, piper            |
//! | [`http`]        | synthesizer | generic JSON-in / WAV-out endpoint       |
//! | [`recognizer`]  | recognizer  | any CLI transcriber fed a WAV file       |

mod chain;
pub mod command;
pub mod http;
pub mod recognizer;
#[cfg(any(test, feature = "test-utils"))]
pub mod scripted;

use std::sync::Arc;

use serde::Serialize;
use voxgate_core::{Settings, VoiceConfig};

use crate::clip::{AudioClip, AudioFormat};
use crate::error::BackendError;

pub use chain::BackendChain;
use command::CommandSynthesizer;
use http::HttpSynthesizer;
use recognizer::CommandRecognizer;

// ── Shared types ───────────────────────────────────────────────────

/// Rough price of using a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CostTier {
    Free,
    Metered,
}

/// What a backend can do, reported without running it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Produces audio incrementally.
    pub streaming: bool,
    /// Formats the backend emits (synthesizers) or accepts (recognizers).
    /// Empty means "whatever the engine decides".
    pub formats: Vec<AudioFormat>,
    pub cost: CostTier,
    /// Runs on this machine (no network).
    pub local: bool,
    /// Longest input the backend accepts, in characters.
    pub max_input_chars: Option<usize>,
}

impl Capabilities {
    pub const fn local_program(max_input_chars: Option<usize>) -> Self {
        Self {
            streaming: false,
            formats: Vec::new(),
            cost: CostTier::Free,
            local: true,
            max_input_chars,
        }
    }

    /// Whether `len` characters fit this backend.
    pub fn accepts_len(&self, len: usize) -> bool {
        self.max_input_chars.is_none_or(|max| len <= max)
    }
}

/// Per-request synthesis options, taken from the request's voice config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SynthesisOptions {
    pub voice_id: Option<String>,
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl From<&VoiceConfig> for SynthesisOptions {
    fn from(config: &VoiceConfig) -> Self {
        Self {
            voice_id: config.voice_id.clone(),
            settings: config.settings.clone(),
        }
    }
}

/// One row of [`BackendChain::availability`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendStatus {
    pub name: String,
    pub available: bool,
    pub capabilities: Capabilities,
}

// ── Traits ─────────────────────────────────────────────────────────

/// Identity and liveness shared by every backend.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Fast liveness/config check. Re-run on every selection.
    async fn is_available(&self) -> bool;
}

/// Text-to-speech engine.
#[async_trait::async_trait]
pub trait SpeechSynthesizer: Backend {
    /// Synthesize `text` into a clip. Playback is the caller's business.
    async fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<AudioClip, BackendError>;
}

/// Speech-to-text engine.
#[async_trait::async_trait]
pub trait SpeechRecognizer: Backend {
    /// Transcribe a clip; an empty string means no speech was found.
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, BackendError>;
}

// ── Default chains ─────────────────────────────────────────────────

/// Synthesizers in priority order: piper (when a model is configured), the
/// HTTP endpoint (when configured), espeak-ng, then macOS `say`.
pub fn synthesizers_from_settings(settings: &Settings) -> BackendChain<dyn SpeechSynthesizer> {
    let mut chain: BackendChain<dyn SpeechSynthesizer> = BackendChain::new();

    if let Some(model) = &settings.piper_model {
        chain.push(Arc::new(CommandSynthesizer::piper(model)));
    }
    if let Some(url) = &settings.http_tts_url {
        match HttpSynthesizer::new(url, &settings.http_tts_key_env) {
            Ok(backend) => chain.push(Arc::new(backend)),
            Err(e) => tracing::warn!(%e, "HTTP synthesizer disabled"),
        }
    }
    chain.push(Arc::new(CommandSynthesizer::espeak_ng()));
    chain.push(Arc::new(CommandSynthesizer::say()));
    chain
}

/// The configured recognizer command, if any.
pub fn recognizers_from_settings(settings: &Settings) -> BackendChain<dyn SpeechRecognizer> {
    let mut chain: BackendChain<dyn SpeechRecognizer> = BackendChain::new();
    if let Some(recognizer) = settings
        .stt_command
        .as_deref()
        .and_then(CommandRecognizer::from_command_line)
    {
        chain.push(Arc::new(recognizer));
    }
    chain
}

// ── Helpers ────────────────────────────────────────────────────────

/// Fail with [`BackendError::InputTooLong`] when `text` exceeds the backend's limit.
pub(crate) fn check_input_len(backend: &dyn Backend, text: &str) -> Result<(), BackendError> {
    let len = text.chars().count();
    match backend.capabilities().max_input_chars {
        Some(max) if len > max => Err(BackendError::InputTooLong {
            backend: backend.name().to_string(),
            len,
            max,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_len_limit() {
        let caps = Capabilities::local_program(Some(10));
        assert!(caps.accepts_len(10));
        assert!(!caps.accepts_len(11));
        assert!(Capabilities::local_program(None).accepts_len(usize::MAX));
    }

    #[test]
    fn default_chain_order_follows_settings() {
        let mut settings = Settings::with_defaults();
        assert_eq!(synthesizers_from_settings(&settings).names(), vec!["espeak-ng", "say"]);

        settings.piper_model = Some("/models/en.onnx".into());
        settings.http_tts_url = Some("https://tts.example.com/v1/speak".into());
        assert_eq!(
            synthesizers_from_settings(&settings).names(),
            vec!["piper", "http", "espeak-ng", "say"]
        );
    }

    #[test]
    fn recognizer_chain_needs_a_command() {
        let mut settings = Settings::with_defaults();
        assert!(recognizers_from_settings(&settings).is_empty());
        settings.stt_command = Some("whisper-cli -m base.bin".into());
        assert_eq!(recognizers_from_settings(&settings).names(), vec!["whisper-cli"]);
    }

    #[test]
    fn options_copy_voice_config() {
        let mut config = VoiceConfig {
            backend: Some("espeak-ng".into()),
            voice_id: Some("en-us".into()),
            ..VoiceConfig::default()
        };
        config.settings.insert("rate".into(), serde_json::json!(170));

        let options = SynthesisOptions::from(&config);
        assert_eq!(options.voice_id.as_deref(), Some("en-us"));
        assert_eq!(options.settings["rate"], 170);
    }
}
