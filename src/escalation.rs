//! Incident lifecycle: idle → tracking → conversing → alarmed.
//!
//! All escalation-level mutation happens here and is driven only by the
//! monitor loop, so the level has a single writer.

use tracing::info;

use crate::config::GuardConfig;
use crate::debounce::DebounceEvent;

/// Words that mark a reply as hostile (matched case-insensitively as substrings).
const HOSTILE_WORDS: &[&str] = &["fuck", "shit", "bastard", "bitch"];

pub fn is_hostile(reply: &str) -> bool {
    let lower = reply.to_lowercase();
    HOSTILE_WORDS.iter().any(|w| lower.contains(w))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Tracking { unknown_count: u32 },
    Conversing,
    Alarmed,
}

/// Outcome of feeding an input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Still below the threshold.
    Tracking { unknown_count: u32 },
    /// Threshold reached: open the conversation at `level`.
    ConversationStarted { level: u8 },
    /// A known repeat intruder raised the level.
    LevelRaised { level: u8 },
    /// Run the next turn at `level`.
    NextTurn { level: u8, hostile: bool },
    /// Maximum reached: sound the alarm and alert.
    AlarmArmed { level: u8 },
    /// A trusted person ended the incident.
    TrustedOverride { was_alarmed: bool },
    /// The room stayed empty long enough while alarmed.
    RoomCleared,
}

pub struct EscalationState {
    phase: Phase,
    level: u8,
    unknown_threshold: u32,
    max_level: u8,
    repeat_level: u8,
    advance_on_reply: bool,
}

impl EscalationState {
    pub fn new(unknown_threshold: u32, max_level: u8, repeat_level: u8, advance_on_reply: bool) -> Self {
        Self {
            phase: Phase::Idle,
            level: 0,
            unknown_threshold: unknown_threshold.max(1),
            max_level: max_level.max(1),
            repeat_level: repeat_level.min(max_level.max(1)),
            advance_on_reply,
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(
            config.recognition.unknown_threshold,
            config.conversation.max_escalation,
            config.conversation.repeat_intruder_level,
            config.conversation.advance_on_reply,
        )
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    pub fn max_level(&self) -> u8 {
        self.max_level
    }

    pub fn is_alarmed(&self) -> bool {
        self.phase == Phase::Alarmed
    }

    pub fn in_incident(&self) -> bool {
        self.phase != Phase::Idle
    }

    /// Feed one debounced event. Trusted beats room-clear beats unknown;
    /// the debouncer already emits at most one of them per pass.
    pub fn on_event(&mut self, event: DebounceEvent) -> Transition {
        match event {
            DebounceEvent::None => Transition::None,

            DebounceEvent::TrustedSeen => {
                if self.phase == Phase::Idle {
                    return Transition::None;
                }
                let was_alarmed = self.is_alarmed();
                info!(phase = ?self.phase, level = self.level, "trusted override");
                self.reset();
                Transition::TrustedOverride { was_alarmed }
            }

            DebounceEvent::RoomClearConfirmed => {
                if !self.is_alarmed() {
                    return Transition::None;
                }
                info!(level = self.level, "room clear");
                self.reset();
                Transition::RoomCleared
            }

            DebounceEvent::UnknownConfirmed(count) => match self.phase {
                Phase::Idle | Phase::Tracking { .. } => {
                    if count >= self.unknown_threshold {
                        self.phase = Phase::Conversing;
                        info!(level = self.level, "conversation started");
                        Transition::ConversationStarted { level: self.level }
                    } else {
                        self.phase = Phase::Tracking { unknown_count: count };
                        info!(count, threshold = self.unknown_threshold, "unknown person");
                        Transition::Tracking { unknown_count: count }
                    }
                }
                Phase::Conversing | Phase::Alarmed => Transition::None,
            },
        }
    }

    /// A known repeat intruder was recognised during the incident.
    pub fn note_repeat_intruder(&mut self) -> Transition {
        match self.phase {
            Phase::Tracking { .. } | Phase::Conversing => {
                let raised = self.level.max(self.repeat_level);
                if raised > self.level {
                    self.level = raised;
                    info!(level = raised, "repeat intruder raised level");
                    Transition::LevelRaised { level: raised }
                } else {
                    Transition::None
                }
            }
            Phase::Idle | Phase::Alarmed => Transition::None,
        }
    }

    /// Outcome of one conversational turn: the captured reply, or `None`
    /// when nothing usable was heard before the capture timed out.
    pub fn on_reply(&mut self, reply: Option<&str>) -> Transition {
        if self.phase != Phase::Conversing {
            return Transition::None;
        }

        let hostile = reply.map(is_hostile).unwrap_or(false);
        let advance = match reply {
            None => true,
            Some(_) => hostile || self.advance_on_reply,
        };
        if advance {
            self.level = (self.level + 1).min(self.max_level);
        }
        if hostile {
            info!(level = self.level, "hostile reply");
        }

        if self.level >= self.max_level {
            self.phase = Phase::Alarmed;
            info!(level = self.level, "maximum escalation");
            Transition::AlarmArmed { level: self.level }
        } else {
            Transition::NextTurn {
                level: self.level,
                hostile,
            }
        }
    }

    /// Back to idle; level returns to zero.
    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.level = 0;
    }
}
