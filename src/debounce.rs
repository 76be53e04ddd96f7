use crate::types::FrameSummary;

/// Stable signal derived from a run of classification passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceEvent {
    None,
    /// Another confirmed unknown detection; carries the running count.
    UnknownConfirmed(u32),
    TrustedSeen,
    RoomClearConfirmed,
}

/// Debounce accumulators. `unknown_streak` and `clear_streak` never advance
/// in the same pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceCounters {
    pub unknown_streak: u32,
    pub unknown_confirmed: u32,
    pub clear_streak: u32,
}

/// Turns per-pass face summaries into stable presence events.
pub struct Debouncer {
    counters: DebounceCounters,
    streak_frames: u32,
    clear_frames: u32,
}

impl Debouncer {
    pub fn new(streak_frames: u32, clear_frames: u32) -> Self {
        Self {
            counters: DebounceCounters::default(),
            streak_frames: streak_frames.max(1),
            clear_frames: clear_frames.max(1),
        }
    }

    /// Feed one classification pass. `alarm_active` enables room-clear
    /// counting and suspends unknown counting.
    pub fn observe(&mut self, summary: FrameSummary, alarm_active: bool) -> DebounceEvent {
        let c = &mut self.counters;

        if summary.has_trusted {
            c.unknown_streak = 0;
            c.unknown_confirmed = 0;
            c.clear_streak = 0;
            return DebounceEvent::TrustedSeen;
        }

        if summary.has_unknown_or_repeat {
            c.clear_streak = 0;
            if alarm_active {
                c.unknown_streak = 0;
                return DebounceEvent::None;
            }
            c.unknown_streak += 1;
            if c.unknown_streak >= self.streak_frames {
                c.unknown_streak = 0;
                c.unknown_confirmed += 1;
                return DebounceEvent::UnknownConfirmed(c.unknown_confirmed);
            }
            return DebounceEvent::None;
        }

        // Empty room.
        c.unknown_streak = 0;
        if !alarm_active {
            c.clear_streak = 0;
            return DebounceEvent::None;
        }
        c.clear_streak += 1;
        if c.clear_streak >= self.clear_frames {
            c.clear_streak = 0;
            return DebounceEvent::RoomClearConfirmed;
        }
        DebounceEvent::None
    }

    pub fn counters(&self) -> DebounceCounters {
        self.counters
    }

    pub fn reset(&mut self) {
        self.counters = DebounceCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> Debouncer {
        Debouncer::new(2, 30)
    }

    #[test]
    fn two_consecutive_unknowns_confirm_once() {
        let mut d = debouncer();
        assert_eq!(d.observe(FrameSummary::unknown(), false), DebounceEvent::None);
        assert_eq!(
            d.observe(FrameSummary::unknown(), false),
            DebounceEvent::UnknownConfirmed(1)
        );
        assert_eq!(d.counters().unknown_streak, 0);
        assert_eq!(d.observe(FrameSummary::unknown(), false), DebounceEvent::None);
        assert_eq!(
            d.observe(FrameSummary::unknown(), false),
            DebounceEvent::UnknownConfirmed(2)
        );
    }

    #[test]
    fn isolated_unknown_does_not_count() {
        let mut d = debouncer();
        d.observe(FrameSummary::unknown(), false);
        d.observe(FrameSummary::empty(), false);
        d.observe(FrameSummary::unknown(), false);
        d.observe(FrameSummary::trusted(), false);
        d.observe(FrameSummary::unknown(), false);
        assert_eq!(d.counters().unknown_confirmed, 0);
        assert_eq!(d.counters().unknown_streak, 1);
    }

    #[test]
    fn trusted_overrides_and_resets() {
        let mut d = debouncer();
        d.observe(FrameSummary::unknown(), false);
        d.observe(FrameSummary::unknown(), false);
        assert_eq!(d.counters().unknown_confirmed, 1);

        let mixed = FrameSummary {
            has_trusted: true,
            has_unknown_or_repeat: true,
        };
        assert_eq!(d.observe(mixed, false), DebounceEvent::TrustedSeen);
        assert_eq!(d.observe(FrameSummary::trusted(), false), DebounceEvent::TrustedSeen);
        assert_eq!(d.counters(), DebounceCounters::default());
    }

    #[test]
    fn room_clear_needs_thirty_empty_passes_while_alarmed() {
        let mut d = debouncer();
        let mut clears = 0;
        for i in 0..30 {
            let ev = d.observe(FrameSummary::empty(), true);
            if ev == DebounceEvent::RoomClearConfirmed {
                clears += 1;
                assert_eq!(i, 29);
            }
        }
        assert_eq!(clears, 1);
        assert_eq!(d.counters().clear_streak, 0);
    }

    #[test]
    fn unknown_face_breaks_clear_streak() {
        let mut d = debouncer();
        for _ in 0..29 {
            d.observe(FrameSummary::empty(), true);
        }
        assert_eq!(d.observe(FrameSummary::unknown(), true), DebounceEvent::None);
        assert_eq!(d.counters().clear_streak, 0);
        assert_eq!(d.counters().unknown_streak, 0);
        assert_eq!(d.observe(FrameSummary::empty(), true), DebounceEvent::None);
    }

    #[test]
    fn empty_room_without_alarm_is_quiet() {
        let mut d = debouncer();
        for _ in 0..100 {
            assert_eq!(d.observe(FrameSummary::empty(), false), DebounceEvent::None);
        }
        assert_eq!(d.counters().clear_streak, 0);
    }

    #[test]
    fn streaks_are_mutually_exclusive() {
        let mut d = debouncer();
        let seq = [
            FrameSummary::unknown(),
            FrameSummary::empty(),
            FrameSummary::empty(),
            FrameSummary::unknown(),
            FrameSummary::trusted(),
            FrameSummary::empty(),
        ];
        for (i, s) in seq.iter().cycle().take(60).enumerate() {
            d.observe(*s, i % 3 == 0);
            let c = d.counters();
            assert!(c.unknown_streak == 0 || c.clear_streak == 0);
        }
    }
}
