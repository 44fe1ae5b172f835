//! hardware/mod.rs
//! Hardware seams for the dispenser: servo drive channels, the drop sensor and
//! the blocking delay used for dwell times.
//!
//! - `ServoChannel`: one PWM output; writes a duty value, releases to passive input.
//! - `DropSensor`: binary vibration/contact input, sampled on demand.
//! - `Delay`: blocking wait; real boards use `SpinDelay`, the simulated board `RecordingDelay`.

pub mod simulated;
pub mod timing;

use std::time::Duration;
use thiserror::Error;

pub use simulated::{BoardLog, BoardOp, RandomSensor, RecordingDelay, ScriptedSensor, SimServo};
pub use timing::{NoopDelay, SpinDelay};

/// Fault raised by a drive channel or sensor input.
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("pin {pin}: PWM write of duty {duty} failed: {reason}")]
    PwmWrite { pin: u8, duty: u16, reason: String },

    #[error("pin {pin}: failed to release channel: {reason}")]
    Release { pin: u8, reason: String },

    #[error("pin {pin}: sensor read failed: {reason}")]
    SensorRead { pin: u8, reason: String },
}

/// Logic level sampled from the drop sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorLevel {
    /// 0: nothing has fallen past the sensor.
    NoDrop,
    /// 1: vibration detected, a pill was released.
    Dropped,
}

impl SensorLevel {
    pub fn from_bit(bit: u8) -> Self {
        if bit == 0 {
            SensorLevel::NoDrop
        } else {
            SensorLevel::Dropped
        }
    }

    pub fn as_bit(self) -> u8 {
        match self {
            SensorLevel::NoDrop => 0,
            SensorLevel::Dropped => 1,
        }
    }

    pub fn is_drop(self) -> bool {
        self == SensorLevel::Dropped
    }
}

/// One PWM servo output.
///
/// `set_duty` engages the channel on first use; `release` reconfigures the pin
/// as a passive input so the servo draws no holding current.
pub trait ServoChannel: Send {
    fn pin(&self) -> u8;
    /// PWM carrier frequency the channel was opened at.
    fn frequency_hz(&self) -> u32;
    fn set_duty(&mut self, duty: u16) -> Result<(), HardwareError>;
    fn release(&mut self) -> Result<(), HardwareError>;
    fn is_driving(&self) -> bool;
}

/// The drop sensor shared by every container of the device.
pub trait DropSensor: Send {
    fn pin(&self) -> u8;
    fn sample(&mut self) -> Result<SensorLevel, HardwareError>;
}

/// Blocking wait used for the settle delay and step holds.
pub trait Delay: Send {
    fn delay(&mut self, duration: Duration);
}
