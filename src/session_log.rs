//! Per-session event log, written as a JSON array at deactivation.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    Activation {
        phrase: String,
        success: bool,
        confidence: Option<f32>,
    },
    FaceRecognition {
        name: String,
        confidence: f32,
    },
    Conversation {
        escalation_level: u8,
        intruder_input: Option<String>,
        guard_response: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    #[serde(flatten)]
    pub event: LogEvent,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStats {
    /// Percentage of activation attempts that matched.
    pub activation_success_rate: Option<f32>,
    pub avg_recognition_confidence: Option<f32>,
    pub conversation_turns: usize,
    pub levels_used: BTreeSet<u8>,
}

pub struct SessionLog {
    path: PathBuf,
    entries: Vec<LogEntry>,
}

impl SessionLog {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn record(&mut self, event: LogEvent) {
        self.entries.push(LogEntry {
            timestamp: Local::now(),
            event,
        });
    }

    pub fn log_activation(&mut self, phrase: &str, success: bool, confidence: Option<f32>) {
        self.record(LogEvent::Activation {
            phrase: phrase.to_string(),
            success,
            confidence,
        });
    }

    pub fn log_recognition(&mut self, name: &str, confidence: f32) {
        self.record(LogEvent::FaceRecognition {
            name: name.to_string(),
            confidence,
        });
    }

    pub fn log_conversation(&mut self, level: u8, intruder_input: Option<&str>, guard_response: &str) {
        self.record(LogEvent::Conversation {
            escalation_level: level,
            intruder_input: intruder_input.map(str::to_string),
            guard_response: guard_response.to_string(),
        });
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        info!(path = %self.path.display(), entries = self.entries.len(), "session log saved");
        Ok(())
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        let (mut attempts, mut successes) = (0u32, 0u32);
        let (mut recognitions, mut confidence_sum) = (0u32, 0.0f32);

        for entry in &self.entries {
            match &entry.event {
                LogEvent::Activation { success, .. } => {
                    attempts += 1;
                    successes += *success as u32;
                }
                LogEvent::FaceRecognition { confidence, .. } => {
                    recognitions += 1;
                    confidence_sum += confidence;
                }
                LogEvent::Conversation { escalation_level, .. } => {
                    stats.conversation_turns += 1;
                    stats.levels_used.insert(*escalation_level);
                }
            }
        }
        if attempts > 0 {
            stats.activation_success_rate = Some(successes as f32 / attempts as f32 * 100.0);
        }
        if recognitions > 0 {
            stats.avg_recognition_confidence = Some(confidence_sum / recognitions as f32);
        }
        stats
    }

    pub fn log_stats(&self) {
        let s = self.stats();
        info!(
            activation_success_rate = ?s.activation_success_rate,
            avg_recognition_confidence = ?s.avg_recognition_confidence,
            conversation_turns = s.conversation_turns,
            levels_used = ?s.levels_used,
            "session statistics"
        );
    }
}
