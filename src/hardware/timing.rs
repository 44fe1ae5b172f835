//! timing.rs
//! Blocking delays for servo dwell times.
//! - SpinDelay: OS sleep for the bulk of the wait, yield-spin for the tail (consistent holds)
//! - NoopDelay: returns immediately; benchmarks and dry runs

use spin_sleep::{SpinSleeper, SpinStrategy};
use std::time::Duration;

use crate::hardware::Delay;

/// Native accuracy handed to the spin sleeper (100 µs).
const NATIVE_ACCURACY_NS: u32 = 100_000;

pub struct SpinDelay {
    sleeper: SpinSleeper,
}

impl SpinDelay {
    pub fn new() -> Self {
        Self {
            sleeper: SpinSleeper::new(NATIVE_ACCURACY_NS)
                .with_spin_strategy(SpinStrategy::YieldThread),
        }
    }
}

impl Default for SpinDelay {
    fn default() -> Self {
        Self::new()
    }
}

impl Delay for SpinDelay {
    fn delay(&mut self, duration: Duration) {
        if !duration.is_zero() {
            self.sleeper.sleep(duration);
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelay;

impl Delay for NoopDelay {
    fn delay(&mut self, _duration: Duration) {}
}
