//! poller.rs
//! Schedule polling loop: read the clock once per tick, dispense every due container.
//!
//! - Each minute is processed at most once, so a poll period below one minute
//!   never releases the same dose twice
//! - Due containers are dispensed one after another; a failed container does not
//!   stop the rest of that minute's doses
//! - A period longer than one minute can step over a scheduled minute

use log::{debug, info};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use crate::dispenser::{DispenseError, DispenseReport, Dispenser};
use crate::schedule::{Clock, Schedule, TimeOfDay};

/// Longest single sleep between running-flag checks.
const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

#[derive(Debug)]
pub struct TickReport {
    pub time: TimeOfDay,
    /// The minute had already been processed by an earlier tick.
    pub repeated: bool,
    pub results: Vec<(usize, Result<DispenseReport, DispenseError>)>,
}

impl TickReport {
    pub fn dispensed(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }
}

pub struct SchedulePoller<C: Clock> {
    schedule: Schedule,
    clock: C,
    period: Duration,
    last_minute: Option<TimeOfDay>,
}

impl<C: Clock> SchedulePoller<C> {
    pub fn new(schedule: Schedule, clock: C, period: Duration) -> Self {
        Self {
            schedule,
            clock,
            period,
            last_minute: None,
        }
    }

    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// One polling step.
    pub fn tick(&mut self, dispenser: &mut Dispenser) -> TickReport {
        let time = self.clock.now();

        if self.last_minute == Some(time) {
            debug!("[Schedule] {} already processed", time);
            return TickReport {
                time,
                repeated: true,
                results: Vec::new(),
            };
        }
        self.last_minute = Some(time);

        let due = self.schedule.due(time);
        if due.is_empty() {
            debug!("[Schedule] {} nothing due", time);
        } else {
            info!("[Schedule] {} due containers: {:?}", time, due);
        }

        let results = due
            .into_iter()
            .map(|slot| (slot, dispenser.dispense(slot)))
            .collect();

        TickReport {
            time,
            repeated: false,
            results,
        }
    }

    /// Ticks every period until `running` is cleared. A dispense in progress is
    /// never interrupted; the flag is checked between ticks.
    pub fn run(&mut self, dispenser: &mut Dispenser, running: &AtomicBool) {
        info!(
            "[Schedule] polling every {:?} ({} entries)",
            self.period,
            self.schedule.entries().len()
        );

        while running.load(Ordering::Acquire) {
            self.tick(dispenser);

            let mut remaining = self.period;
            while !remaining.is_zero() && running.load(Ordering::Acquire) {
                let step = remaining.min(SHUTDOWN_POLL);
                thread::sleep(step);
                remaining -= step;
            }
        }

        info!("[Schedule] polling stopped");
    }
}
