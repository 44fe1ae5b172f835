//! Dispenser: container actuators, the sensor-gated release sequence and the
//! device that ties them to the shared drop sensor.

pub mod actuator;
pub mod device;
pub mod profile;
pub mod sequencer;

use thiserror::Error;

use crate::hardware::HardwareError;

pub use actuator::Actuator;
pub use device::Dispenser;
pub use profile::{MotionProfile, MotionStep, ProfileError};
pub use sequencer::{DispenseReport, RetryLimit, Sequencer, SequencerState};

#[derive(Debug, Error)]
pub enum DispenseError {
    #[error("no actuator configured for container {slot}")]
    UnknownActuator { slot: usize },

    #[error("container {slot}: drop not confirmed after {passes} passes")]
    Unconfirmed { slot: usize, passes: u32 },

    #[error("container {slot}: {source}")]
    Hardware {
        slot: usize,
        #[source]
        source: HardwareError,
    },
}
