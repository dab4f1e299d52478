//! `voxgate speak`.
//!
//! Hooks run this, so it never fails loudly: coordination problems become a
//! `Skipped` outcome, printed only with `--verbose`.

use std::io::{IsTerminal, Read};

use voxgate_client::{SpeakOutcome, SpeakRequest, Speaker};

use crate::commands::SpeakArgs;
use crate::context::CliContext;
use crate::error::CliError;

pub async fn execute(ctx: &CliContext, args: SpeakArgs) -> Result<SpeakOutcome, CliError> {
    let text = match args.text.clone() {
        Some(text) => text,
        None => read_stdin()?,
    };
    let request = build_request(text, args);

    let speaker = Speaker::from_settings(&ctx.settings, &ctx.paths);
    let outcome = speaker.speak(&request).await;
    if ctx.debug {
        eprintln!("{}", describe(&outcome));
    }
    Ok(outcome)
}

fn read_stdin() -> Result<String, CliError> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Err(CliError::Arguments("no text given and stdin is a terminal".into()));
    }
    let mut text = String::new();
    stdin.read_to_string(&mut text)?;
    Ok(text)
}

pub fn build_request(text: String, args: SpeakArgs) -> SpeakRequest {
    let mut request = SpeakRequest::new(text, args.session, args.event).with_priority(args.priority);
    request.agent_id = args.agent;
    request.voice_config.backend = args.backend;
    request.voice_config.voice_id = args.voice;
    request
}

/// One-line summary of an outcome.
pub fn describe(outcome: &SpeakOutcome) -> String {
    match outcome {
        SpeakOutcome::Spoken {
            path,
            backend,
            duration,
            voice_source,
        } => format!(
            "spoken via {path:?} with {backend} ({voice_source:?} voice, {} ms)",
            duration.as_millis()
        ),
        SpeakOutcome::Skipped { path: Some(path), reason } => {
            format!("skipped on {path:?} path: {reason}")
        }
        SpeakOutcome::Skipped { path: None, reason } => format!("skipped: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voxgate_client::CoordinationPath;
    use voxgate_core::{Priority, SpeakError, VoiceSource};

    fn args() -> SpeakArgs {
        SpeakArgs {
            text: None,
            priority: Priority::High,
            session: "s1".into(),
            event: "stop".into(),
            agent: Some("helper".into()),
            backend: Some("piper".into()),
            voice: Some("en_US-amy".into()),
        }
    }

    #[test]
    fn request_carries_every_flag() {
        let request = build_request("hello".into(), args());
        assert_eq!(request.text, "hello");
        assert_eq!(request.priority, Priority::High);
        assert_eq!(request.session_id, "s1");
        assert_eq!(request.event, "stop");
        assert_eq!(request.agent_id.as_deref(), Some("helper"));
        assert_eq!(request.voice_config.backend.as_deref(), Some("piper"));
        assert_eq!(request.voice_config.voice_id.as_deref(), Some("en_US-amy"));
    }

    #[test]
    fn outcomes_are_summarized() {
        let spoken = SpeakOutcome::Spoken {
            path: CoordinationPath::Daemon,
            backend: "espeak-ng".into(),
            duration: Duration::from_millis(1_250),
            voice_source: VoiceSource::Default,
        };
        assert_eq!(describe(&spoken), "spoken via Daemon with espeak-ng (Default voice, 1250 ms)");

        let skipped = SpeakOutcome::Skipped {
            path: Some(CoordinationPath::Lock),
            reason: SpeakError::LockContention("s1/stop".into()),
        };
        assert!(describe(&skipped).starts_with("skipped on Lock path"));
    }
}
