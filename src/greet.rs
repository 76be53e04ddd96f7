use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{Local, Timelike};

/// Last time each trusted person was greeted. Entries are never evicted;
/// they simply stop suppressing once older than the window.
pub struct GreetedRegistry {
    last_greeted: HashMap<String, Instant>,
    window: Duration,
}

impl GreetedRegistry {
    pub fn new(window: Duration) -> Self {
        Self {
            last_greeted: HashMap::new(),
            window,
        }
    }

    /// Returns true (and records `now`) if `name` has not been greeted
    /// within the window.
    pub fn should_greet(&mut self, name: &str, now: Instant) -> bool {
        if let Some(last) = self.last_greeted.get(name) {
            if now.saturating_duration_since(*last) < self.window {
                return false;
            }
        }
        self.last_greeted.insert(name.to_string(), now);
        true
    }
}

/// Greeting for the local time of day.
pub fn greeting(name: &str) -> String {
    greeting_for_hour(name, Local::now().hour())
}

pub fn greeting_for_hour(name: &str, hour: u32) -> String {
    match hour {
        5..=11 => format!("Good morning, {}!", name),
        12..=16 => format!("Good afternoon, {}!", name),
        17..=20 => format!("Welcome back, {}!", name),
        _ => format!("Working late, {}?", name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppressed_within_window() {
        let mut reg = GreetedRegistry::new(Duration::from_secs(60));
        let t0 = Instant::now();
        assert!(reg.should_greet("Asha", t0));
        assert!(!reg.should_greet("Asha", t0 + Duration::from_secs(59)));
        assert!(reg.should_greet("Ravi", t0 + Duration::from_secs(1)));
        assert!(reg.should_greet("Asha", t0 + Duration::from_secs(60)));
    }

    #[test]
    fn time_of_day() {
        assert_eq!(greeting_for_hour("Asha", 7), "Good morning, Asha!");
        assert_eq!(greeting_for_hour("Asha", 12), "Good afternoon, Asha!");
        assert_eq!(greeting_for_hour("Asha", 20), "Welcome back, Asha!");
        assert_eq!(greeting_for_hour("Asha", 23), "Working late, Asha?");
        assert_eq!(greeting_for_hour("Asha", 3), "Working late, Asha?");
    }
}
