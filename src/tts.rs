use std::process::Command;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::config::TtsConfig;
use crate::error::{GuardError, Result};

/// Speech output. `speak` blocks until the utterance has finished playing.
pub trait SpeechOutput: Send + Sync {
    fn speak(&self, text: &str) -> Result<()>;
}

/// Speaks through the platform TTS command (`say` on macOS, `espeak` elsewhere).
pub struct CommandSpeaker {
    command: String,
    rate: u32,
    // One utterance at a time even if two tasks race.
    lock: Mutex<()>,
}

impl CommandSpeaker {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            command: config.command.clone(),
            rate: config.rate,
            lock: Mutex::new(()),
        }
    }

    fn rate_args(&self) -> Vec<String> {
        match self.command.as_str() {
            "say" => vec!["-r".into(), self.rate.to_string()],
            "espeak" | "espeak-ng" => vec!["-s".into(), self.rate.to_string()],
            _ => Vec::new(),
        }
    }
}

impl SpeechOutput for CommandSpeaker {
    fn speak(&self, text: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        info!("\u{1f50a} {}", text);
        let status = Command::new(&self.command)
            .args(self.rate_args())
            .arg(text)
            .status()
            .map_err(|e| GuardError::SpeechOutput(format!("{}: {}", self.command, e)))?;
        if !status.success() {
            return Err(GuardError::SpeechOutput(format!(
                "{} exited with {}",
                self.command, status
            )));
        }
        debug!("utterance finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_flag_per_engine() {
        let say = CommandSpeaker::new(&TtsConfig {
            command: "say".into(),
            rate: 180,
        });
        assert_eq!(say.rate_args(), vec!["-r", "180"]);
        let espeak = CommandSpeaker::new(&TtsConfig {
            command: "espeak".into(),
            rate: 150,
        });
        assert_eq!(espeak.rate_args(), vec!["-s", "150"]);
    }

    #[test]
    fn missing_binary_is_actuator_failure() {
        let speaker = CommandSpeaker::new(&TtsConfig {
            command: "definitely-not-a-tts-binary".into(),
            rate: 180,
        });
        let err = speaker.speak("hello").unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ActuatorFailure);
    }
}
