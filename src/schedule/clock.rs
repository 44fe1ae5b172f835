//! clock.rs
//! Wall-clock time of day for schedule matching.

use chrono::{TimeDelta, Timelike, Utc};
use parking_lot::Mutex;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("time {0:?} is not in H:M form")]
    Format(String),
    #[error("hour {0} is out of range 0..=23")]
    Hour(u32),
    #[error("minute {0} is out of range 0..=59")]
    Minute(u32),
}

/// Hour and minute on a 24-hour clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimeOfDay {
    hour: u8,
    minute: u8,
}

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self, TimeParseError> {
        if hour > 23 {
            return Err(TimeParseError::Hour(hour));
        }
        if minute > 59 {
            return Err(TimeParseError::Minute(minute));
        }
        Ok(Self {
            hour: hour as u8,
            minute: minute as u8,
        })
    }

    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> u8 {
        self.minute
    }
}

/// Accepts `7:0`, `7:00` and `07:00` alike.
impl FromStr for TimeOfDay {
    type Err = TimeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let format_err = || TimeParseError::Format(s.to_string());
        let (h, m) = s.trim().split_once(':').ok_or_else(format_err)?;
        let hour: u32 = h.trim().parse().map_err(|_| format_err())?;
        let minute: u32 = m.trim().parse().map_err(|_| format_err())?;
        Self::new(hour, minute)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

/// Source of the current local time of day.
pub trait Clock: Send {
    fn now(&mut self) -> TimeOfDay;
}

/// System time shifted by a fixed UTC offset in whole hours.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    utc_offset_hours: i32,
}

impl SystemClock {
    pub fn new(utc_offset_hours: i32) -> Self {
        Self { utc_offset_hours }
    }
}

impl Clock for SystemClock {
    fn now(&mut self) -> TimeOfDay {
        let local = Utc::now() + TimeDelta::hours(self.utc_offset_hours as i64);
        TimeOfDay {
            hour: local.hour() as u8,
            minute: local.minute() as u8,
        }
    }
}

/// Clock set by hand; clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<TimeOfDay>>,
}

impl ManualClock {
    pub fn new(start: TimeOfDay) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn set(&self, time: TimeOfDay) {
        *self.now.lock() = time;
    }
}

impl Clock for ManualClock {
    fn now(&mut self) -> TimeOfDay {
        *self.now.lock()
    }
}
