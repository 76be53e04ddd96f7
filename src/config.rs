//! Guard configuration.
//!
//! [`GuardConfig`] is loaded from an optional JSON file; every field has a
//! default so a partial file (or none at all) is fine. CLI flags are applied
//! on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub trusted_faces_dir: PathBuf,
    pub captures_dir: PathBuf,
    pub intruder_db_dir: PathBuf,
    pub session_log_path: PathBuf,
    /// Control loop cadence.
    pub tick_ms: u64,
    /// Suppress repeated greetings of the same person within this window.
    pub greet_window_secs: u64,
    pub camera: CameraConfig,
    pub recognition: RecognitionConfig,
    pub conversation: ConversationConfig,
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub speech: SpeechConfig,
    pub activation: ActivationConfig,
    pub siren: SirenConfig,
    pub alerts: AlertsConfig,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            trusted_faces_dir: PathBuf::from("trusted_faces"),
            captures_dir: PathBuf::from("captures"),
            intruder_db_dir: PathBuf::from("intruder_database"),
            session_log_path: PathBuf::from("performance_log.json"),
            tick_ms: 30,
            greet_window_secs: 60,
            camera: CameraConfig::default(),
            recognition: RecognitionConfig::default(),
            conversation: ConversationConfig::default(),
            llm: LlmConfig::default(),
            tts: TtsConfig::default(),
            speech: SpeechConfig::default(),
            activation: ActivationConfig::default(),
            siren: SirenConfig::default(),
            alerts: AlertsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Command that writes exactly one JPEG/PNG frame to stdout.
    pub grab_command: Vec<String>,
    pub startup_timeout_secs: u64,
    /// Pause between grabs.
    pub grab_interval_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        let input: &[&str] = if cfg!(target_os = "macos") {
            &["-f", "avfoundation", "-framerate", "30", "-i", "0"]
        } else {
            &["-f", "v4l2", "-i", "/dev/video0"]
        };
        let mut grab_command = vec!["ffmpeg".to_string(), "-loglevel".into(), "error".into()];
        grab_command.extend(input.iter().map(|s| s.to_string()));
        grab_command.extend(
            [
                "-frames:v", "1", "-s", "640x480", "-f", "image2pipe", "-vcodec", "mjpeg", "-",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        Self {
            grab_command,
            startup_timeout_secs: 5,
            grab_interval_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    /// Classification cadence (coarser than the tick).
    pub interval_ms: u64,
    /// Confirmed unknown detections needed to open a conversation.
    pub unknown_threshold: u32,
    /// Consecutive unknown-only passes per confirmed detection.
    pub unknown_streak: u32,
    /// Consecutive empty passes while alarmed before the room counts as clear.
    pub clear_frames: u32,
    pub tolerance: f32,
    pub min_confidence: f32,
    pub encoder_url: String,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            unknown_threshold: 3,
            unknown_streak: 2,
            clear_frames: 30,
            tolerance: 0.5,
            min_confidence: 0.55,
            encoder_url: "http://127.0.0.1:8090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationConfig {
    /// How long a capture waits for the intruder to start talking.
    pub timeout_secs: u64,
    pub phrase_limit_secs: u64,
    pub max_escalation: u8,
    /// Level a conversation opens at once a known repeat intruder is seen.
    pub repeat_intruder_level: u8,
    /// Delay between dispatching an utterance and dispatching the capture.
    pub settle_ms: u64,
    /// Whether an ordinary (non-hostile) reply also advances the level.
    pub advance_on_reply: bool,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 6,
            phrase_limit_secs: 10,
            max_escalation: 3,
            repeat_intruder_level: 2,
            settle_ms: 500,
            advance_on_reply: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub url: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:11434".to_string(),
            model: "phi3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub command: String,
    pub rate: u32,
}

impl Default for TtsConfig {
    fn default() -> Self {
        let command = if cfg!(target_os = "macos") { "say" } else { "espeak" };
        Self {
            command: command.to_string(),
            rate: 180,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    /// Whisper model candidates, first existing one wins.
    pub whisper_models: Vec<PathBuf>,
    pub whisper_threads: i32,
    pub language: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            whisper_models: vec![
                PathBuf::from("models/ggml-base.en.bin"),
                PathBuf::from("models/ggml-large-v3-turbo.bin"),
            ],
            whisper_threads: 4,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub phrase: String,
    pub listen_secs: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            phrase: "guard my room".to_string(),
            listen_secs: 15,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SirenConfig {
    pub volume: f32,
    pub loop_secs: f32,
}

impl Default for SirenConfig {
    fn default() -> Self {
        Self {
            volume: 0.8,
            loop_secs: 7.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub email: Option<EmailConfig>,
    pub telegram: Option<TelegramConfig>,
}

/// HTTP mail relay (Mailgun-style `messages` endpoint).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_user: String,
    pub api_key: String,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    #[serde(default = "default_telegram_api")]
    pub api_base: String,
}

fn default_telegram_api() -> String {
    "https://api.telegram.org".to_string()
}

impl GuardConfig {
    /// Load from `path` if given, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => {
                let raw = std::fs::read_to_string(p).map_err(|e| {
                    GuardError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                serde_json::from_str(&raw).map_err(|e| {
                    GuardError::Config(format!("cannot parse {}: {}", p.display(), e))
                })?
            }
            None => GuardConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let r = &self.recognition;
        let c = &self.conversation;
        if self.tick_ms == 0 {
            return Err(GuardError::Config("tick_ms must be > 0".into()));
        }
        if r.unknown_threshold == 0 || r.unknown_streak == 0 || r.clear_frames == 0 {
            return Err(GuardError::Config(
                "unknown_threshold, unknown_streak and clear_frames must be > 0".into(),
            ));
        }
        if !(r.tolerance > 0.0 && r.tolerance <= 1.0) {
            return Err(GuardError::Config(format!(
                "tolerance {} outside (0, 1]",
                r.tolerance
            )));
        }
        if !(0.0..=1.0).contains(&r.min_confidence) {
            return Err(GuardError::Config(format!(
                "min_confidence {} outside [0, 1]",
                r.min_confidence
            )));
        }
        if c.max_escalation == 0 {
            return Err(GuardError::Config("max_escalation must be > 0".into()));
        }
        if c.repeat_intruder_level > c.max_escalation {
            return Err(GuardError::Config(
                "repeat_intruder_level cannot exceed max_escalation".into(),
            ));
        }
        if self.camera.grab_command.is_empty() {
            return Err(GuardError::Config("camera.grab_command is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.siren.volume) {
            return Err(GuardError::Config("siren.volume outside [0, 1]".into()));
        }
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn classification_interval(&self) -> Duration {
        Duration::from_millis(self.recognition.interval_ms)
    }

    pub fn greet_window(&self) -> Duration {
        Duration::from_secs(self.greet_window_secs)
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.conversation.timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.conversation.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let cfg = GuardConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.recognition.unknown_threshold, 3);
        assert_eq!(cfg.conversation.max_escalation, 3);
        assert_eq!(cfg.recognition.clear_frames, 30);
        assert_eq!(cfg.greet_window(), Duration::from_secs(60));
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"recognition": {{"unknown_threshold": 5}}, "llm": {{"model": "llama3"}}}}"#
        )
        .unwrap();
        let cfg = GuardConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.recognition.unknown_threshold, 5);
        assert_eq!(cfg.recognition.unknown_streak, 2);
        assert_eq!(cfg.llm.model, "llama3");
        assert_eq!(cfg.llm.url, "http://127.0.0.1:11434");
    }

    #[test]
    fn rejects_zero_escalation() {
        let mut cfg = GuardConfig::default();
        cfg.conversation.max_escalation = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_repeat_level_above_max() {
        let mut cfg = GuardConfig::default();
        cfg.conversation.repeat_intruder_level = 4;
        assert!(matches!(cfg.validate(), Err(GuardError::Config(_))));
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = GuardConfig::load(Some(Path::new("/nonexistent/guard.json"))).unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }
}
