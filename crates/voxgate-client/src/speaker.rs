//! The producer-facing `speak` call.
//!
//! # Flow
//!
//! ```text
//! speak(request)
//!   ├─ daemon enabled?
//!   │    connect_or_start → enqueue → waitForGrant
//!   │      granted      → render → reportComplete / reportFailed
//!   │      unreachable  → lock path
//!   │      anything else → Skipped
//!   └─ lock path
//!        try_acquire → render → guard dropped
//!        held → Skipped (duplicate suppression)
//! ```
//!
//! `render` is backend selection, synthesis and playback. Every outcome,
//! spoken or skipped, is appended to the event log.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use voxgate_core::paths::ResolvedPaths;
use voxgate_core::{
    EnqueueRequest, EventRecord, LockKey, Priority, Settings, SpeakError, VoiceConfig,
    VoiceSource,
};
use voxgate_voice::backend::synthesizers_from_settings;
use voxgate_voice::{
    AudioBufferManager, Backend, BackendChain, ClipPlayer, SpeechSynthesizer, SynthesisOptions,
};

use crate::autostart::{Launcher, ProcessLauncher, connect_or_start};
use crate::config::ClientConfig;
use crate::event_log::EventLog;
use crate::lock::LockManager;

/// One utterance a producer wants spoken.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeakRequest {
    pub text: String,
    pub priority: Priority,
    pub voice_config: VoiceConfig,
    pub session_id: String,
    /// Producer event kind (hook name); part of the lock key.
    pub event: String,
    pub agent_id: Option<String>,
}

impl SpeakRequest {
    pub fn new(text: impl Into<String>, session_id: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            priority: Priority::Normal,
            voice_config: VoiceConfig::default(),
            session_id: session_id.into(),
            event: event.into(),
            agent_id: None,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.voice_config.backend = Some(backend.into());
        self
    }

    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    fn lock_key(&self) -> LockKey {
        LockKey::new(&self.session_id, &self.event, self.agent_id.clone())
    }

    fn to_enqueue(&self) -> EnqueueRequest {
        EnqueueRequest {
            text: self.text.clone(),
            priority: self.priority,
            voice_config: self.voice_config.clone(),
            session_id: self.session_id.clone(),
            agent_id: self.agent_id.clone(),
        }
    }

    fn text_length(&self) -> usize {
        self.text.chars().count()
    }
}

/// How a turn to speak was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinationPath {
    Daemon,
    Lock,
}

/// Result of [`Speaker::speak`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeakOutcome {
    Spoken {
        path: CoordinationPath,
        backend: String,
        duration: Duration,
        voice_source: VoiceSource,
    },
    Skipped {
        /// `None` when the request was rejected before coordination.
        path: Option<CoordinationPath>,
        reason: SpeakError,
    },
}

impl SpeakOutcome {
    pub const fn is_spoken(&self) -> bool {
        matches!(self, Self::Spoken { .. })
    }

    pub const fn path(&self) -> Option<CoordinationPath> {
        match self {
            Self::Spoken { path, .. } => Some(*path),
            Self::Skipped { path, .. } => *path,
        }
    }
}

struct Rendered {
    backend: String,
    duration: Duration,
    voice_source: VoiceSource,
}

impl Rendered {
    fn spoken(self, path: CoordinationPath) -> SpeakOutcome {
        SpeakOutcome::Spoken {
            path,
            backend: self.backend,
            duration: self.duration,
            voice_source: self.voice_source,
        }
    }
}

/// Coordinates, synthesizes and plays utterances for one producer.
pub struct Speaker {
    config: ClientConfig,
    synthesizers: BackendChain<dyn SpeechSynthesizer>,
    player: Arc<dyn ClipPlayer>,
    locks: LockManager,
    events: EventLog,
    launcher: Option<Arc<dyn Launcher>>,
}

impl Speaker {
    pub fn new(
        config: ClientConfig,
        synthesizers: BackendChain<dyn SpeechSynthesizer>,
        player: Arc<dyn ClipPlayer>,
    ) -> Self {
        Self {
            locks: LockManager::new(config.locks_dir.clone(), config.lock_stale_after),
            events: EventLog::new(config.event_log.clone()),
            config,
            synthesizers,
            player,
            launcher: None,
        }
    }

    /// Daemon launcher used when nobody answers on the socket.
    #[must_use]
    pub fn with_launcher(mut self, launcher: Option<Arc<dyn Launcher>>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Speaker wired from the environment: configured backends, the system
    /// audio device, and the `voxgate` binary for auto-start.
    pub fn from_env() -> Result<Self, SpeakError> {
        let settings =
            Settings::from_env().map_err(|e| SpeakError::invalid_request(e.to_string()))?;
        let paths =
            ResolvedPaths::from_env().map_err(|e| SpeakError::invalid_request(e.to_string()))?;
        Ok(Self::from_settings(&settings, &paths))
    }

    pub fn from_settings(settings: &Settings, paths: &ResolvedPaths) -> Self {
        let config = ClientConfig::from_settings(settings, paths);
        let launcher = ProcessLauncher::resolve(config.daemon_bin.as_deref())
            .map(|launcher| Arc::new(launcher) as Arc<dyn Launcher>);

        Self::new(
            config,
            synthesizers_from_settings(settings),
            Arc::new(AudioBufferManager::system()),
        )
        .with_launcher(launcher)
    }

    pub const fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub const fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub const fn synthesizers(&self) -> &BackendChain<dyn SpeechSynthesizer> {
        &self.synthesizers
    }

    /// Speak `request` if and when it is this producer's turn.
    ///
    /// Never fails: problems come back as [`SpeakOutcome::Skipped`].
    pub async fn speak(&self, request: &SpeakRequest) -> SpeakOutcome {
        let outcome = self.coordinate(request).await;
        self.record(request, &outcome);
        outcome
    }

    async fn coordinate(&self, request: &SpeakRequest) -> SpeakOutcome {
        if request.text.trim().is_empty() {
            return SpeakOutcome::Skipped {
                path: None,
                reason: SpeakError::invalid_request("text is empty"),
            };
        }

        if self.config.daemon_disabled {
            debug!("Daemon disabled, using speaker lock");
        } else {
            match self.via_daemon(request).await {
                Ok(rendered) => return rendered.spoken(CoordinationPath::Daemon),
                Err(e) if e.falls_back_to_lock() => {
                    debug!(error = %e, "Daemon unreachable, using speaker lock");
                }
                Err(reason) => {
                    return SpeakOutcome::Skipped {
                        path: Some(CoordinationPath::Daemon),
                        reason,
                    };
                }
            }
        }

        match self.via_lock(request).await {
            Ok(rendered) => rendered.spoken(CoordinationPath::Lock),
            Err(reason) => SpeakOutcome::Skipped {
                path: Some(CoordinationPath::Lock),
                reason,
            },
        }
    }

    async fn via_daemon(&self, request: &SpeakRequest) -> Result<Rendered, SpeakError> {
        let mut client = connect_or_start(&self.config, self.launcher.as_ref()).await?;
        let id = client.enqueue(request.to_enqueue()).await?;
        debug!(%id, priority = %request.priority, "Enqueued, waiting for turn");

        client
            .wait_for_grant(id, self.config.grant_timeout, self.config.grace)
            .await?;
        debug!(%id, "Granted");

        match self.render(request).await {
            Ok(rendered) => {
                if let Err(e) = client.report_complete(id, rendered.duration).await {
                    warn!(%id, error = %e, "Failed to report completion");
                }
                Ok(rendered)
            }
            Err(e) => {
                if let Err(report) = client.report_failed(id, &e.to_string()).await {
                    warn!(%id, error = %report, "Failed to report failure");
                }
                Err(e)
            }
        }
    }

    async fn via_lock(&self, request: &SpeakRequest) -> Result<Rendered, SpeakError> {
        let _guard = self.locks.try_acquire(&request.lock_key())?;
        self.render(request).await
    }

    async fn render(&self, request: &SpeakRequest) -> Result<Rendered, SpeakError> {
        let requested = request.voice_config.backend.as_deref();
        let preferred = requested.or(self.config.preferred_backend.as_deref());
        let backend = self
            .synthesizers
            .select_for(preferred, request.text_length())
            .await?;

        let voice_source = match requested {
            None => VoiceSource::Default,
            Some(name) if name == backend.name() => VoiceSource::Request,
            Some(_) => VoiceSource::Fallback,
        };

        let clip = backend
            .synthesize(&request.text, &SynthesisOptions::from(&request.voice_config))
            .await?;

        let player = Arc::clone(&self.player);
        let duration = tokio::task::spawn_blocking(move || player.play(&clip))
            .await
            .map_err(|e| SpeakError::PlaybackFailure(e.to_string()))??;

        Ok(Rendered {
            backend: backend.name().to_string(),
            duration,
            voice_source,
        })
    }

    fn record(&self, request: &SpeakRequest, outcome: &SpeakOutcome) {
        let requested_source = if request.voice_config.backend.is_some() {
            VoiceSource::Request
        } else {
            VoiceSource::Default
        };

        let mut record = EventRecord {
            timestamp: Utc::now(),
            session_id: request.session_id.clone(),
            event: request.event.clone(),
            text_length: request.text_length(),
            backend: None,
            voice_id: request.voice_config.voice_id.clone(),
            voice_source: requested_source,
            agent_id: request.agent_id.clone(),
            duration_ms: None,
            success: outcome.is_spoken(),
            error: None,
        };

        match outcome {
            SpeakOutcome::Spoken {
                path,
                backend,
                duration,
                voice_source,
            } => {
                info!(
                    session_id = %request.session_id,
                    event = %request.event,
                    ?path,
                    backend = %backend,
                    ?duration,
                    "Spoke"
                );
                record.backend = Some(backend.clone());
                record.voice_source = *voice_source;
                record.duration_ms = Some(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
            }
            SpeakOutcome::Skipped { path, reason } => {
                if reason.is_silent_skip() {
                    debug!(session_id = %request.session_id, ?path, %reason, "Skipped duplicate");
                } else {
                    warn!(session_id = %request.session_id, ?path, %reason, "Skipped speaking");
                }
                record.error = Some(reason.to_string());
            }
        }

        if let Err(e) = self.events.append(&record) {
            warn!(path = %self.events.path().display(), error = %e, "Failed to append event log");
        }
    }
}
