//! Speech recognition through a local CLI (e.g. whisper.cpp's `whisper-cli`).

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use super::{Backend, Capabilities, SpeechRecognizer};
use crate::clip::{AudioClip, AudioFormat};
use crate::error::BackendError;
use crate::wav;

const INPUT_PLACEHOLDER: &str = "{input}";

/// Whisper-family models expect 16 kHz mono.
const RECOGNIZER_FORMAT: AudioFormat = AudioFormat::new(16_000, 1);

/// Runs `program args…` with `{input}` replaced by a temporary 16 kHz WAV
/// and takes stdout as the transcript.
#[derive(Debug, Clone)]
pub struct CommandRecognizer {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandRecognizer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(120),
        }
    }

    /// Parse a whitespace-separated command line. The input file is appended
    /// when the line has no `{input}` placeholder.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        let mut args: Vec<String> = parts.collect();
        if !args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(INPUT_PLACEHOLDER.to_string());
        }
        Some(Self::new(program, args))
    }
}

#[async_trait::async_trait]
impl Backend for CommandRecognizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            formats: vec![RECOGNIZER_FORMAT],
            ..Capabilities::local_program(None)
        }
    }

    async fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }
}

#[async_trait::async_trait]
impl SpeechRecognizer for CommandRecognizer {
    async fn transcribe(&self, clip: &AudioClip) -> Result<String, BackendError> {
        if clip.is_empty() {
            return Ok(String::new());
        }
        let clip = clip
            .clone()
            .convert(RECOGNIZER_FORMAT)
            .map_err(BackendError::Playback)?;

        let file = tempfile::Builder::new()
            .prefix("voxgate-stt-")
            .suffix(".wav")
            .tempfile()?;
        tokio::fs::write(file.path(), wav::encode_pcm16(&clip)?).await?;
        let input = file.path().display().to_string();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, &input))
            .collect();

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::transcription(&self.program, format!("failed to start: {e}")))?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| BackendError::transcription(&self.program, "timed out"))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::transcription(
                &self.program,
                format!("exited with {}: {}", output.status, stderr.trim()),
            ));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!(recognizer = %self.program, chars = text.len(), "Transcribed");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_line_gets_input_appended() {
        let rec = CommandRecognizer::from_command_line("whisper-cli -m model.bin -nt").unwrap();
        assert_eq!(rec.program, "whisper-cli");
        assert_eq!(rec.args, vec!["-m", "model.bin", "-nt", "{input}"]);
    }

    #[test]
    fn explicit_placeholder_is_kept_in_place() {
        let rec = CommandRecognizer::from_command_line("stt -f {input} --quiet").unwrap();
        assert_eq!(rec.args, vec!["-f", "{input}", "--quiet"]);
    }

    #[test]
    fn blank_command_line_is_none() {
        assert!(CommandRecognizer::from_command_line("   ").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stdout_becomes_the_transcript() {
        // `echo hello {input}` prints the word plus the temp path; take the first word.
        let rec = CommandRecognizer::new("echo", vec!["hello".into(), INPUT_PLACEHOLDER.into()]);
        let clip = AudioClip::new(vec![0.0; 1_600], 16_000, 1);
        let text = rec.transcribe(&clip).await.unwrap();
        assert!(text.starts_with("hello "));
        assert!(text.ends_with(".wav"));
    }

    #[tokio::test]
    async fn empty_clip_skips_the_program() {
        let rec = CommandRecognizer::new("voxgate-no-such-program", Vec::new());
        let clip = AudioClip::new(Vec::new(), 16_000, 1);
        assert_eq!(rec.transcribe(&clip).await.unwrap(), "");
    }
}
