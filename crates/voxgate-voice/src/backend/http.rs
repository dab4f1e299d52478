//! Generic HTTP synthesizer: POST JSON, receive WAV.
//!
//! Request body:
//!
//! ```json
//! { "text": "...", "voice": "id or null", "settings": { ... }, "format": "wav" }
//! ```
//!
//! The API key is read from a named environment variable on every call and
//! sent as a bearer token.

use std::time::Duration;

use serde::Serialize;

use super::{Backend, Capabilities, CostTier, SpeechSynthesizer, SynthesisOptions, check_input_len};
use crate::clip::AudioClip;
use crate::error::BackendError;
use crate::wav;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    voice: Option<&'a str>,
    settings: &'a serde_json::Map<String, serde_json::Value>,
    format: &'static str,
}

/// Network text-to-speech endpoint.
#[derive(Debug, Clone)]
pub struct HttpSynthesizer {
    url: String,
    key_env: String,
    client: reqwest::Client,
}

impl HttpSynthesizer {
    pub fn new(url: impl Into<String>, key_env: impl Into<String>) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| BackendError::synthesis("http", e.to_string()))?;
        Ok(Self {
            url: url.into(),
            key_env: key_env.into(),
            client,
        })
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.key_env).ok().filter(|k| !k.trim().is_empty())
    }
}

#[async_trait::async_trait]
impl Backend for HttpSynthesizer {
    fn name(&self) -> &str {
        "http"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            streaming: false,
            formats: Vec::new(),
            cost: CostTier::Metered,
            local: false,
            max_input_chars: Some(4_096),
        }
    }

    async fn is_available(&self) -> bool {
        !self.url.trim().is_empty() && self.api_key().is_some()
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<AudioClip, BackendError> {
        check_input_len(self, text)?;
        let key = self
            .api_key()
            .ok_or_else(|| BackendError::synthesis("http", format!("{} is not set", self.key_env)))?;

        let body = SynthesisRequest {
            text,
            voice: options.voice_id.as_deref(),
            settings: &options.settings,
            format: "wav",
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::synthesis("http", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(BackendError::synthesis(
                "http",
                format!("endpoint returned {status}: {}", detail.trim()),
            ));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| BackendError::synthesis("http", e.to_string()))?;
        let clip = wav::decode(&bytes)?;
        tracing::debug!(url = %self.url, samples = clip.samples.len(), "Synthesized over HTTP");
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unavailable_without_key() {
        let backend = HttpSynthesizer::new("http://127.0.0.1:9/tts", "VOXGATE_TEST_KEY_THAT_IS_NEVER_SET").unwrap();
        assert!(!backend.is_available().await);
    }

    #[tokio::test]
    async fn unavailable_without_url() {
        let backend = HttpSynthesizer::new("  ", "PATH").unwrap();
        assert!(!backend.is_available().await);
    }

    #[tokio::test]
    async fn available_with_url_and_key() {
        // PATH is set in any test environment.
        let backend = HttpSynthesizer::new("http://127.0.0.1:9/tts", "PATH").unwrap();
        assert!(backend.is_available().await);
    }

    #[test]
    fn request_body_shape() {
        let settings = serde_json::Map::new();
        let body = SynthesisRequest {
            text: "hi",
            voice: None,
            settings: &settings,
            format: "wav",
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["text"], "hi");
        assert!(json["voice"].is_null());
        assert_eq!(json["format"], "wav");
    }
}
