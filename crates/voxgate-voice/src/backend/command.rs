//! Synthesizers that shell out to a local program producing WAV.
//!
//! Text is always written to the program's stdin so leading dashes or shell
//! metacharacters in the text are never interpreted. Audio comes back either
//! on stdout or in a temporary file whose path replaces `{output}` in the
//! argument template.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{Backend, Capabilities, SpeechSynthesizer, SynthesisOptions, check_input_len};
use crate::clip::AudioClip;
use crate::error::BackendError;
use crate::wav;

const OUTPUT_PLACEHOLDER: &str = "{output}";
const VOICE_PLACEHOLDER: &str = "{voice}";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Where the program writes its audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSink {
    Stdout,
    /// A temp file substituted for `{output}`.
    TempFile,
}

/// A program invoked once per utterance.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    name: String,
    program: String,
    args: Vec<String>,
    /// Prepended to `args` when the request names a voice.
    voice_args: Vec<String>,
    sink: AudioSink,
    /// Files that must exist for the backend to be usable (e.g. a model).
    requires: Vec<PathBuf>,
    timeout: Duration,
    max_input_chars: Option<usize>,
}

impl CommandSynthesizer {
    pub fn new(name: impl Into<String>, program: impl Into<String>, sink: AudioSink) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            voice_args: Vec::new(),
            sink,
            requires: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            max_input_chars: Some(10_000),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn voice_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.voice_args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn requires(mut self, path: impl Into<PathBuf>) -> Self {
        self.requires.push(path.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub const fn max_input_chars(mut self, max: Option<usize>) -> Self {
        self.max_input_chars = max;
        self
    }

    /// `espeak-ng --stdout --stdin`.
    pub fn espeak_ng() -> Self {
        Self::new("espeak-ng", "espeak-ng", AudioSink::Stdout)
            .args(["--stdout", "--stdin"])
            .voice_args(["-v", VOICE_PLACEHOLDER])
    }

    /// macOS `say`, reading stdin, writing 16-bit WAV.
    pub fn say() -> Self {
        Self::new("say", "say", AudioSink::TempFile)
            .args([
                "-f",
                "-",
                "-o",
                OUTPUT_PLACEHOLDER,
                "--file-format=WAVE",
                "--data-format=LEI16@22050",
            ])
            .voice_args(["-v", VOICE_PLACEHOLDER])
    }

    /// piper with a voice model (`.onnx`).
    pub fn piper(model: impl Into<PathBuf>) -> Self {
        let model = model.into();
        Self::new("piper", "piper", AudioSink::TempFile)
            .args([
                "--model".to_string(),
                model.display().to_string(),
                "--output_file".to_string(),
                OUTPUT_PLACEHOLDER.to_string(),
            ])
            .voice_args(["--speaker", VOICE_PLACEHOLDER])
            .requires(model)
    }

    /// Final argument list for one invocation.
    fn command_args(&self, voice: Option<&str>, output: Option<&str>) -> Vec<String> {
        let voice_args = voice.map_or(&[][..], |_| self.voice_args.as_slice());
        voice_args
            .iter()
            .chain(&self.args)
            .map(|arg| {
                let mut arg = arg.clone();
                if let Some(voice) = voice {
                    arg = arg.replace(VOICE_PLACEHOLDER, voice);
                }
                if let Some(output) = output {
                    arg = arg.replace(OUTPUT_PLACEHOLDER, output);
                }
                arg
            })
            .collect()
    }

    async fn run(&self, text: &str, args: &[String]) -> Result<Vec<u8>, BackendError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(if self.sink == AudioSink::Stdout {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BackendError::synthesis(&self.name, format!("failed to start {}: {e}", self.program)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // A program that exits without reading is judged by its exit status.
            match stdin.write_all(text.as_bytes()).await {
                Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => return Err(e.into()),
                _ => {}
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| {
                BackendError::synthesis(&self.name, format!("timed out after {:?}", self.timeout))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::synthesis(
                &self.name,
                format!("{} exited with {}: {}", self.program, output.status, stderr.trim()),
            ));
        }
        Ok(output.stdout)
    }
}

#[async_trait::async_trait]
impl Backend for CommandSynthesizer {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::local_program(self.max_input_chars)
    }

    async fn is_available(&self) -> bool {
        which::which(&self.program).is_ok() && self.requires.iter().all(|p| p.exists())
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str, options: &SynthesisOptions) -> Result<AudioClip, BackendError> {
        check_input_len(self, text)?;
        let voice = options.voice_id.as_deref();

        let bytes = match self.sink {
            AudioSink::Stdout => self.run(text, &self.command_args(voice, None)).await?,
            AudioSink::TempFile => {
                let file = tempfile::Builder::new()
                    .prefix("voxgate-tts-")
                    .suffix(".wav")
                    .tempfile()?;
                let path = file.path().display().to_string();
                self.run(text, &self.command_args(voice, Some(&path))).await?;
                tokio::fs::read(file.path()).await?
            }
        };

        let clip = wav::decode(&bytes)?;
        if clip.is_empty() {
            return Err(BackendError::synthesis(&self.name, "program produced no audio"));
        }
        tracing::debug!(
            backend = %self.name,
            samples = clip.samples.len(),
            sample_rate = clip.sample_rate,
            "Synthesized"
        );
        Ok(clip)
    }
}
