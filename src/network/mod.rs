//! network/mod.rs
//! Time synchronisation collaborator, run once before the control loop starts.
//!
//! The device needs a correct wall clock for its schedule. Association and
//! clock sync belong to the platform; this module only drives the blocking
//! retry loop around it with capped exponential backoff.

use log::{info, warn};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use thiserror::Error;

/// 2020-01-01T00:00:00Z. A clock reading earlier than this was never set.
const SANE_EPOCH_SECS: u64 = 1_577_836_800;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network unavailable: {0}")]
    Network(String),
    #[error("clock not set (reads {secs}s since epoch)")]
    ClockUnset { secs: u64 },
}

pub trait TimeSync {
    fn synchronize(&mut self) -> Result<(), SyncError>;
}

/// Host platforms keep their own time; succeed once the system clock looks set.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostTimeSync;

impl TimeSync for HostTimeSync {
    fn synchronize(&mut self) -> Result<(), SyncError> {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        if secs < SANE_EPOCH_SECS {
            return Err(SyncError::ClockUnset { secs });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Wait before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

/// Blocks until `sync` succeeds. Returns the number of attempts made, or `None`
/// if `running` was cleared first.
pub fn sync_blocking(
    sync: &mut dyn TimeSync,
    backoff: Backoff,
    running: &AtomicBool,
) -> Option<u32> {
    let mut attempt: u32 = 0;
    while running.load(Ordering::Acquire) {
        attempt += 1;
        match sync.synchronize() {
            Ok(()) => {
                info!("[TimeSync] synchronised after {} attempt(s)", attempt);
                return Some(attempt);
            }
            Err(e) => {
                let wait = backoff.delay_for(attempt);
                warn!("[TimeSync] attempt {} failed: {}; retrying in {:?}", attempt, e, wait);
                thread::sleep(wait);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakySync {
        failures_left: u32,
        calls: u32,
    }

    impl TimeSync for FlakySync {
        fn synchronize(&mut self) -> Result<(), SyncError> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(SyncError::Network("no association".into()));
            }
            Ok(())
        }
    }

    fn fast() -> Backoff {
        Backoff {
            initial: Duration::from_millis(1),
            max: Duration::from_millis(4),
        }
    }

    #[test]
    fn retries_until_success() {
        let mut sync = FlakySync { failures_left: 3, calls: 0 };
        let running = AtomicBool::new(true);
        assert_eq!(sync_blocking(&mut sync, fast(), &running), Some(4));
        assert_eq!(sync.calls, 4);
    }

    #[test]
    fn gives_up_when_stopped() {
        let mut sync = FlakySync { failures_left: 10, calls: 0 };
        let running = AtomicBool::new(false);
        assert_eq!(sync_blocking(&mut sync, fast(), &running), None);
        assert_eq!(sync.calls, 0);
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let b = Backoff {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(700),
        };
        assert_eq!(b.delay_for(1), Duration::from_millis(100));
        assert_eq!(b.delay_for(2), Duration::from_millis(200));
        assert_eq!(b.delay_for(3), Duration::from_millis(400));
        assert_eq!(b.delay_for(4), Duration::from_millis(700));
        assert_eq!(b.delay_for(40), Duration::from_millis(700));
    }

    #[test]
    fn host_clock_is_set() {
        assert!(HostTimeSync.synchronize().is_ok());
    }
}
