//! `voxgate transcribe`.

use std::path::Path;

use voxgate_voice::backend::recognizers_from_settings;
use voxgate_voice::{Backend, SpeechRecognizer, wav};

use crate::context::CliContext;
use crate::error::CliError;

pub async fn execute(ctx: &CliContext, file: &Path) -> Result<(), CliError> {
    let bytes = tokio::fs::read(file).await?;
    let clip = wav::decode(&bytes)?;

    let recognizer = recognizers_from_settings(&ctx.settings)
        .get_with_fallback(None)
        .await?;
    tracing::debug!(backend = recognizer.name(), frames = clip.frames(), "Transcribing");

    let text = recognizer.transcribe(&clip).await?;
    println!("{}", text.trim());
    Ok(())
}
