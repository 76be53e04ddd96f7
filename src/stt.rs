use std::sync::Arc;

use anyhow::Result;

use crate::config::SpeechConfig;

/// Common interface for speech-to-text backends.
pub trait SttEngine: Send + Sync {
    /// Transcribe a complete audio segment (16kHz mono f32).
    fn transcribe(&self, audio: &[f32]) -> Result<String>;
}

/// Load the first configured Whisper model that exists.
#[cfg(feature = "whisper")]
pub fn create_engine(config: &SpeechConfig) -> Result<Arc<dyn SttEngine>> {
    use anyhow::Context;
    use tracing::info;

    use crate::stt_whisper::WhisperEngine;

    let model = config
        .whisper_models
        .iter()
        .find(|p| p.exists())
        .with_context(|| format!("No Whisper model found (tried {:?})", config.whisper_models))?;
    info!(model = %model.display(), "loading Whisper model");
    let engine = WhisperEngine::new(model, config.whisper_threads, &config.language)?;
    info!("Whisper model loaded");
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "whisper"))]
pub fn create_engine(_config: &SpeechConfig) -> Result<Arc<dyn SttEngine>> {
    anyhow::bail!("built without speech recognition (enable the `whisper` feature)")
}

/// Trim a raw transcript and drop non-speech markers such as
/// `[BLANK_AUDIO]` or `(wind blowing)`. Returns `None` if nothing is left.
pub fn clean_transcript(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '[' | '(' => depth += 1,
            ']' | ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    let text = out.split_whitespace().collect::<Vec<_>>().join(" ");
    if text.chars().any(|c| c.is_alphanumeric()) {
        Some(text)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markers() {
        assert_eq!(clean_transcript(" [BLANK_AUDIO] "), None);
        assert_eq!(clean_transcript("(wind blowing) ..."), None);
        assert_eq!(
            clean_transcript("  I live   here [music] ").as_deref(),
            Some("I live here")
        );
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn no_engine_without_feature() {
        assert!(create_engine(&SpeechConfig::default()).is_err());
    }
}
