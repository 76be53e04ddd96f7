use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::stt::SttEngine;

/// Whisper-based STT engine.
pub struct WhisperEngine {
    ctx: WhisperContext,
    threads: i32,
    language: String,
}

impl WhisperEngine {
    pub fn new(model_path: &Path, threads: i32, language: &str) -> Result<Self> {
        let path = model_path
            .to_str()
            .with_context(|| format!("Non-UTF-8 model path {:?}", model_path))?;
        let mut ctx_params = WhisperContextParameters::default();
        ctx_params.flash_attn(true);
        let ctx = WhisperContext::new_with_params(path, ctx_params)
            .with_context(|| format!("Failed to load Whisper model from '{}'", path))?;
        Ok(Self {
            ctx,
            threads: threads.max(1),
            language: language.to_string(),
        })
    }

    fn make_params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.threads);
        params.set_language(Some(self.language.as_str()));
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_print_special(false);
        params.set_suppress_blank(true);
        params.set_suppress_nst(true);
        params.set_single_segment(true);
        params
    }
}

/// Whisper refuses segments shorter than one second.
const MIN_SAMPLES: usize = 16_000;

impl SttEngine for WhisperEngine {
    fn transcribe(&self, audio: &[f32]) -> Result<String> {
        let mut padded;
        let audio = if audio.len() < MIN_SAMPLES {
            padded = audio.to_vec();
            padded.resize(MIN_SAMPLES + MIN_SAMPLES / 10, 0.0);
            padded.as_slice()
        } else {
            audio
        };

        let mut state = self
            .ctx
            .create_state()
            .context("Failed to create Whisper state")?;
        state
            .full(self.make_params(), audio)
            .context("Whisper transcription failed")?;

        let text: String = (0..state.full_n_segments())
            .filter_map(|i| state.get_segment(i))
            .filter_map(|segment| segment.to_str().ok().map(str::to_owned))
            .collect();
        debug!(samples = audio.len(), chars = text.len(), "transcribed");
        Ok(text)
    }
}
