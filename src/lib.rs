pub mod activation;
pub mod alert_gate;
pub mod audio;
pub mod camera;
pub mod classifier;
pub mod config;
pub mod debounce;
pub mod error;
pub mod escalation;
pub mod greet;
pub mod listener;
pub mod llm;
pub mod monitor;
pub mod notifier;
pub mod registry;
pub mod session_log;
pub mod siren;
pub mod state;
pub mod stt;
#[cfg(feature = "whisper")]
pub mod stt_whisper;
pub mod tts;
pub mod turn;
pub mod types;
