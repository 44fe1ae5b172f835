//! profile.rs
//! Servo motion profile: the ordered duty/hold steps one release pass drives through.
//!
//! Holds are physical transit times. When retiming, change every hold together:
//! a servo that has not reached step N when step N+1 is written never opens fully.

use std::time::Duration;
use thiserror::Error;

/// PWM frequency the profile's duty values are calibrated for.
pub const DEFAULT_PWM_FREQUENCY_HZ: u32 = 40;

/// Calibrated release path for the SG90 containers (duty units 0..=1023 at 40 Hz).
pub const DEFAULT_STEPS: &[(u16, u64)] = &[
    (100, 500),
    (40, 300),
    (30, 300),
    (25, 300),
    (20, 300),
    (15, 500),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionStep {
    pub duty: u16,
    pub hold: Duration,
}

impl MotionStep {
    pub fn new(duty: u16, hold: Duration) -> Self {
        Self { duty, hold }
    }

    pub fn from_millis(duty: u16, hold_ms: u64) -> Self {
        Self::new(duty, Duration::from_millis(hold_ms))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
    #[error("motion profile has no steps")]
    Empty,
    #[error("motion profile step {index} has a zero hold time")]
    ZeroHold { index: usize },
}

/// Non-empty sequence of motion steps; the last step's duty is the neutral position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionProfile {
    steps: Vec<MotionStep>,
}

impl MotionProfile {
    pub fn new(steps: Vec<MotionStep>) -> Result<Self, ProfileError> {
        if steps.is_empty() {
            return Err(ProfileError::Empty);
        }
        if let Some(index) = steps.iter().position(|s| s.hold.is_zero()) {
            return Err(ProfileError::ZeroHold { index });
        }
        Ok(Self { steps })
    }

    /// Builds a profile from `(duty, hold_ms)` pairs.
    pub fn from_millis(pairs: &[(u16, u64)]) -> Result<Self, ProfileError> {
        Self::new(
            pairs
                .iter()
                .map(|&(duty, hold_ms)| MotionStep::from_millis(duty, hold_ms))
                .collect(),
        )
    }

    pub fn steps(&self) -> &[MotionStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Duty the servo rests at after a full pass.
    pub fn neutral_duty(&self) -> u16 {
        self.steps[self.steps.len() - 1].duty
    }

    /// Sum of all holds: the commanded duration of one pass.
    pub fn pass_duration(&self) -> Duration {
        self.steps.iter().map(|s| s.hold).sum()
    }
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            steps: DEFAULT_STEPS
                .iter()
                .map(|&(duty, hold_ms)| MotionStep::from_millis(duty, hold_ms))
                .collect(),
        }
    }
}
