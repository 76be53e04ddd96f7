use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::LlmConfig;

/// Per-level instructions, mildest first.
const LEVEL_PROMPTS: &[&str] = &[
    "You are a security guard. Unknown person entered. Ask identity. ONE sentence, 15 words max.",
    "You are a stern guard. Tell them to leave private property NOW. ONE sentence, 20 words max.",
    "FINAL warning. Say police will be called. ONE sentence, 20 words max.",
    "MAX alert. Say police notified. ONE sentence, 15 words max.",
];

const NO_REPLY_LINES: &[&str] = &["Who are you?", "Leave NOW!", "FINAL WARNING!", "POLICE CALLED!"];

const MAX_RESPONSE_CHARS: usize = 120;

/// Produces the guard's next line for a given escalation level.
pub trait ResponseGenerator: Send + Sync {
    /// `input` is the intruder's last reply, `None` when opening or after silence.
    /// Never fails: implementations fall back to canned lines.
    fn respond(&self, input: Option<&str>, level: u8) -> String;
}

/// Ollama `/api/generate` client with canned fallbacks.
pub struct OllamaResponder {
    agent: ureq::Agent,
    url: String,
    model: String,
    available: bool,
}

impl OllamaResponder {
    /// Probe the server once; when it is unreachable every response comes
    /// from the fallback table.
    pub fn connect(config: &LlmConfig) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(15)))
            .build()
            .into();

        let tags_url = format!("{}/api/tags", config.url);
        let available = match agent.get(&tags_url).call() {
            Ok(_) => {
                info!(url = %config.url, model = %config.model, "LLM server reachable");
                true
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, "LLM server not reachable, using fallback lines");
                false
            }
        };

        Self {
            agent,
            url: format!("{}/api/generate", config.url),
            model: config.model.clone(),
            available,
        }
    }

    fn query(&self, input: Option<&str>, level: u8) -> Option<String> {
        let instructions = LEVEL_PROMPTS[level_index(level)];
        let prompt = match input {
            Some(text) => format!("{}\nIntruder: \"{}\"\nYour response:", instructions, text),
            None => format!("{}\nYour response:", instructions),
        };

        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": { "temperature": 0.5, "num_predict": 30 }
        });

        let response = match self.agent.post(&self.url).send_json(&body) {
            Ok(resp) => resp,
            Err(e) => {
                warn!(error = %e, "LLM request failed");
                return None;
            }
        };

        let resp_body: serde_json::Value = match response.into_body().read_json() {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "LLM response parse error");
                return None;
            }
        };

        let raw = resp_body["response"].as_str().unwrap_or("");
        debug!(raw, "LLM raw");
        clean_response(raw)
    }
}

impl ResponseGenerator for OllamaResponder {
    fn respond(&self, input: Option<&str>, level: u8) -> String {
        let generated = if self.available {
            self.query(input, level)
        } else {
            None
        };
        let line = generated.unwrap_or_else(|| fallback_response(input, level).to_string());
        info!(level, "\u{1f916} {}", line);
        line
    }
}

fn level_index(level: u8) -> usize {
    (level as usize).min(LEVEL_PROMPTS.len() - 1)
}

/// Keep the first sentence of a model completion, stripped of quotes and
/// markdown. Too-short output is rejected.
pub fn clean_response(raw: &str) -> Option<String> {
    let stripped = raw.replace('"', "").replace("**", "");
    let mut text = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(dot) = text.find('.') {
        text.truncate(dot + 1);
    }
    if text.chars().count() > MAX_RESPONSE_CHARS {
        text = text.chars().take(MAX_RESPONSE_CHARS).collect();
    }

    if text.chars().count() > 5 {
        Some(text)
    } else {
        None
    }
}

/// Deterministic line used when the model is unavailable or says nothing useful.
pub fn fallback_response(input: Option<&str>, level: u8) -> &'static str {
    let level = level_index(level);
    let Some(text) = input else {
        return NO_REPLY_LINES[level];
    };

    let lower = text.to_lowercase();
    match level {
        0 if lower.contains("friend") => "I don't recognize you. Call your friend or leave.",
        0 if lower.contains("lost") => "Wrong room. Check room number and exit.",
        0 => "Who are you? Why are you here?",
        1 => "You're trespassing! Leave NOW!",
        2 => "LAST WARNING! Police being called!",
        _ => "POLICE NOTIFIED! GET OUT!",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_first_sentence() {
        assert_eq!(
            clean_response("  \"**Who are you?** State   your name. Now.\"").as_deref(),
            Some("Who are you? State your name.")
        );
    }

    #[test]
    fn rejects_short_output() {
        assert_eq!(clean_response("Ok."), None);
        assert_eq!(clean_response("   "), None);
    }

    #[test]
    fn truncates_long_output() {
        let long = "a".repeat(300);
        assert_eq!(clean_response(&long).map(|s| s.len()), Some(MAX_RESPONSE_CHARS));
    }

    #[test]
    fn fallback_by_level_and_input() {
        assert_eq!(fallback_response(None, 0), "Who are you?");
        assert_eq!(fallback_response(None, 3), "POLICE CALLED!");
        assert_eq!(fallback_response(None, 9), "POLICE CALLED!");
        assert_eq!(
            fallback_response(Some("I'm his friend"), 0),
            "I don't recognize you. Call your friend or leave."
        );
        assert_eq!(
            fallback_response(Some("I got lost"), 0),
            "Wrong room. Check room number and exit."
        );
        assert_eq!(fallback_response(Some("whatever"), 1), "You're trespassing! Leave NOW!");
    }

    #[test]
    fn unreachable_server_uses_fallback() {
        let responder = OllamaResponder::connect(&LlmConfig {
            url: "http://127.0.0.1:9".into(),
            model: "phi3".into(),
        });
        assert_eq!(responder.respond(None, 1), "Leave NOW!");
    }
}
