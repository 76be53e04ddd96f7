use std::time::{Duration, Instant};

use tracing::info;

/// Guard session flags.
///
/// `guard_active` spans the whole activation; the other two flags track one
/// incident and are always cleared together.
#[derive(Debug, Default)]
pub struct SessionState {
    guard_active: bool,
    intruder_detected: bool,
    conversation_active: bool,
    activated_at: Option<Instant>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn activate_guard(&mut self) {
        self.guard_active = true;
        self.activated_at = Some(Instant::now());
        info!("guard active");
    }

    /// Clears every flag. Returns how long the guard was active.
    pub fn deactivate_guard(&mut self) -> Option<Duration> {
        self.guard_active = false;
        self.intruder_detected = false;
        self.conversation_active = false;
        info!("guard inactive");
        self.activated_at.take().map(|t| t.elapsed())
    }

    pub fn detect_intruder(&mut self) {
        self.intruder_detected = true;
    }

    pub fn start_conversation(&mut self) {
        self.conversation_active = true;
    }

    pub fn end_conversation(&mut self) {
        self.conversation_active = false;
        self.intruder_detected = false;
    }

    pub fn guard_active(&self) -> bool {
        self.guard_active
    }

    pub fn intruder_detected(&self) -> bool {
        self.intruder_detected
    }

    pub fn conversation_active(&self) -> bool {
        self.conversation_active
    }

    /// Time since activation, `None` when inactive.
    pub fn uptime(&self) -> Option<Duration> {
        self.activated_at.map(|t| t.elapsed())
    }
}
