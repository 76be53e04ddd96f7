//! Voice activation: keep listening until the activation phrase is heard.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{info, warn};

use crate::listener::SpeechInput;
use crate::session_log::SessionLog;

/// Ways the recogniser commonly mishears "guard my room".
const MISHEARD: &[&str] = &[
    "guide my room",
    "god my room",
    "card my room",
    "guard the room",
    "guide the room",
    "guard ma room",
    "guide ma room",
    "gard my room",
    "guard room",
    "guide room",
];
const GUARD_WORDS: &[&str] = &["guard", "guide", "god", "card", "gard"];
const ROOM_WORDS: &[&str] = &["room", "rum"];

const SIMILARITY_THRESHOLD: f32 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MatchKind {
    Phrase,
    Fuzzy(f32),
    Keywords,
}

pub struct ActivationMatcher {
    phrase: String,
    alternatives: Vec<String>,
}

impl ActivationMatcher {
    pub fn new(phrase: &str) -> Self {
        let phrase = phrase.trim().to_lowercase();
        let mut alternatives = vec![phrase.clone()];
        alternatives.extend(MISHEARD.iter().map(|s| s.to_string()));
        Self {
            phrase,
            alternatives,
        }
    }

    pub fn phrase(&self) -> &str {
        &self.phrase
    }

    pub fn matches(&self, heard: &str) -> Option<MatchKind> {
        let heard = heard.trim().to_lowercase();
        if self.alternatives.iter().any(|alt| heard.contains(alt.as_str())) {
            return Some(MatchKind::Phrase);
        }
        let ratio = similarity(&self.phrase, &heard);
        if ratio >= SIMILARITY_THRESHOLD {
            return Some(MatchKind::Fuzzy(ratio));
        }
        let has_guard = GUARD_WORDS.iter().any(|w| heard.contains(w));
        let has_room = ROOM_WORDS.iter().any(|w| heard.contains(w));
        if has_guard && has_room {
            return Some(MatchKind::Keywords);
        }
        None
    }
}

/// Ratcliff/Obershelp similarity: `2 * matched / (len(a) + len(b))`, where
/// matched characters come from recursively taking the longest common block.
pub fn similarity(a: &str, b: &str) -> f32 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matched_chars(&a, &b) as f32 / total as f32
}

fn matched_chars(a: &[char], b: &[char]) -> usize {
    let (mut best_len, mut best_a, mut best_b) = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut row = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                row[j + 1] = prev[j] + 1;
                if row[j + 1] > best_len {
                    best_len = row[j + 1];
                    best_a = i + 1 - best_len;
                    best_b = j + 1 - best_len;
                }
            }
        }
        prev = row;
    }
    if best_len == 0 {
        return 0;
    }
    best_len
        + matched_chars(&a[..best_a], &b[..best_b])
        + matched_chars(&a[best_a + best_len..], &b[best_b + best_len..])
}

/// Listen in `window`-long attempts until the phrase matches. Returns false
/// if `running` is cleared first. Every attempt that heard something is
/// recorded in the session log.
pub fn wait_for_activation(
    listener: &dyn SpeechInput,
    matcher: &ActivationMatcher,
    window: Duration,
    running: &AtomicBool,
    log: &mut SessionLog,
) -> bool {
    info!("\u{1f3a7} say \"{}\" to activate", matcher.phrase().to_uppercase());
    while running.load(Ordering::SeqCst) {
        let heard = match listener.listen(window) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                warn!("activation capture failed: {}", e);
                std::thread::sleep(Duration::from_millis(500));
                continue;
            }
        };
        match matcher.matches(&heard) {
            Some(kind) => {
                let confidence = match kind {
                    MatchKind::Fuzzy(r) => r,
                    MatchKind::Phrase | MatchKind::Keywords => 1.0,
                };
                info!(heard = %heard, ?kind, "\u{2705} activated");
                log.log_activation(&heard, true, Some(confidence));
                return true;
            }
            None => {
                info!(heard = %heard, ratio = similarity(matcher.phrase(), &heard.to_lowercase()), "not the activation phrase");
                log.log_activation(&heard, false, None);
            }
        }
    }
    false
}
