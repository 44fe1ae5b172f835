//! Dose schedule: which containers release at which time of day, and the
//! polling loop that checks the clock and dispenses.

pub mod clock;
pub mod poller;

pub use clock::{Clock, ManualClock, SystemClock, TimeOfDay, TimeParseError};
pub use poller::{SchedulePoller, TickReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleEntry {
    pub slot: usize,
    pub time: TimeOfDay,
}

/// Schedule entries in configuration order. Duplicate entries are kept: each
/// one releases a dose.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, slot: usize, time: TimeOfDay) {
        self.entries.push(ScheduleEntry { slot, time });
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Slots due at `time`, one per matching entry, in configuration order.
    pub fn due(&self, time: TimeOfDay) -> Vec<usize> {
        self.entries
            .iter()
            .filter(|e| e.time == time)
            .map(|e| e.slot)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn due_keeps_configuration_order_and_duplicates() {
        let mut s = Schedule::new();
        s.add(2, t("8:0"));
        s.add(1, t("8:0"));
        s.add(1, t("12:30"));
        s.add(2, t("8:00"));

        assert_eq!(s.due(t("8:0")), vec![2, 1, 2]);
        assert_eq!(s.due(t("12:30")), vec![1]);
        assert!(s.due(t("0:0")).is_empty());
    }

    #[test]
    fn empty_schedule() {
        let s = Schedule::new();
        assert!(s.is_empty());
        assert!(s.due(t("7:0")).is_empty());
    }
}
