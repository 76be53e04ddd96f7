use std::collections::HashSet;

use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertTrigger {
    /// A registered intruder was recognised again.
    RepeatIntruderSeen,
    /// The conversation escalated to the alarm.
    MaxEscalationReached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDecision {
    Notify { identity: String },
    /// Already notified for this identity during the incident.
    Suppressed,
    /// No identity could be resolved; the incident carries on without a notice.
    NotDeliverable,
}

/// Once-per-identity notification gate.
#[derive(Debug, Default)]
pub struct AlertGate {
    alerted: HashSet<String>,
}

impl AlertGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once per identity until [`AlertGate::clear`] is called.
    pub fn should_notify(&mut self, identity: &str, trigger: AlertTrigger) -> bool {
        let fresh = self.alerted.insert(identity.to_string());
        debug!(identity, ?trigger, fresh, "alert gate");
        fresh
    }

    pub fn evaluate(&mut self, identity: Option<&str>, trigger: AlertTrigger) -> AlertDecision {
        match identity {
            None => {
                warn!(?trigger, "no intruder identity available, alert not deliverable");
                AlertDecision::NotDeliverable
            }
            Some(id) if self.should_notify(id, trigger) => AlertDecision::Notify {
                identity: id.to_string(),
            },
            Some(_) => AlertDecision::Suppressed,
        }
    }

    pub fn was_alerted(&self, identity: &str) -> bool {
        self.alerted.contains(identity)
    }

    /// Forget every identity; called when an incident ends.
    pub fn clear(&mut self) {
        self.alerted.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notifies_once_per_identity() {
        let mut gate = AlertGate::new();
        assert!(gate.should_notify("INTRUDER_001", AlertTrigger::RepeatIntruderSeen));
        assert!(!gate.should_notify("INTRUDER_001", AlertTrigger::RepeatIntruderSeen));
        assert!(!gate.should_notify("INTRUDER_001", AlertTrigger::MaxEscalationReached));
        assert!(gate.should_notify("INTRUDER_002", AlertTrigger::MaxEscalationReached));
    }

    #[test]
    fn clearing_starts_a_new_incident() {
        let mut gate = AlertGate::new();
        assert!(gate.should_notify("INTRUDER_001", AlertTrigger::RepeatIntruderSeen));
        gate.clear();
        assert!(!gate.was_alerted("INTRUDER_001"));
        assert!(gate.should_notify("INTRUDER_001", AlertTrigger::RepeatIntruderSeen));
    }

    #[test]
    fn missing_identity_is_not_deliverable() {
        let mut gate = AlertGate::new();
        assert_eq!(
            gate.evaluate(None, AlertTrigger::MaxEscalationReached),
            AlertDecision::NotDeliverable
        );
        assert_eq!(
            gate.evaluate(Some("INTRUDER_004"), AlertTrigger::MaxEscalationReached),
            AlertDecision::Notify {
                identity: "INTRUDER_004".into()
            }
        );
        assert_eq!(
            gate.evaluate(Some("INTRUDER_004"), AlertTrigger::MaxEscalationReached),
            AlertDecision::Suppressed
        );
    }
}
