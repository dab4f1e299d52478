//! Scripted backends for tests in this and downstream crates.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{Backend, Capabilities, SpeechRecognizer, SpeechSynthesizer, SynthesisOptions};
use crate::clip::AudioClip;
use crate::error::BackendError;

/// Synthesizer returning a short fixed clip (or a scripted failure).
pub struct ScriptedSynthesizer {
    name: String,
    available: AtomicBool,
    failure: Mutex<Option<String>>,
    max_input_chars: Option<usize>,
    calls: AtomicUsize,
    texts: Mutex<Vec<String>>,
    clip: AudioClip,
}

impl ScriptedSynthesizer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            available: AtomicBool::new(true),
            failure: Mutex::new(None),
            max_input_chars: None,
            calls: AtomicUsize::new(0),
            texts: Mutex::new(Vec::new()),
            // 100 ms of quiet tone at 24 kHz.
            clip: AudioClip::new(vec![0.1; 2_400], 24_000, 1),
        }
    }

    pub fn unavailable(name: impl Into<String>) -> Self {
        let backend = Self::new(name);
        backend.set_available(false);
        backend
    }

    #[must_use]
    pub fn failing(self, reason: impl Into<String>) -> Self {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
        self
    }

    #[must_use]
    pub const fn with_max_input_chars(mut self, max: usize) -> Self {
        self.max_input_chars = Some(max);
        self
    }

    #[must_use]
    pub fn with_clip(mut self, clip: AudioClip) -> Self {
        self.clip = clip;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `synthesize` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts passed to `synthesize`, in call order.
    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::local_program(self.max_input_chars)
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for ScriptedSynthesizer {
    async fn synthesize(&self, text: &str, _options: &SynthesisOptions) -> Result<AudioClip, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());

        let failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match failure {
            Some(reason) => Err(BackendError::synthesis(&self.name, reason)),
            None => Ok(self.clip.clone()),
        }
    }
}

/// Recognizer returning a fixed transcript.
pub struct ScriptedRecognizer {
    name: String,
    transcript: String,
}

impl ScriptedRecognizer {
    pub fn new(name: impl Into<String>, transcript: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transcript: transcript.into(),
        }
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedRecognizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::local_program(None)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for ScriptedRecognizer {
    async fn transcribe(&self, _clip: &AudioClip) -> Result<String, BackendError> {
        Ok(self.transcript.clone())
    }
}
