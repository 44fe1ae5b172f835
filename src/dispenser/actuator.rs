//! actuator.rs
//! One container's servo: the slot number it serves and the drive channel it owns.

use crate::dispenser::DispenseError;
use crate::hardware::{HardwareError, ServoChannel};

pub struct Actuator {
    slot: usize,
    channel: Box<dyn ServoChannel>,
}

impl Actuator {
    /// `slot` is the 1-based container number used by the schedule and the trigger page.
    pub fn new(slot: usize, channel: Box<dyn ServoChannel>) -> Self {
        Self { slot, channel }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn pin(&self) -> u8 {
        self.channel.pin()
    }

    pub fn frequency_hz(&self) -> u32 {
        self.channel.frequency_hz()
    }

    pub fn is_driving(&self) -> bool {
        self.channel.is_driving()
    }

    pub(crate) fn set_duty(&mut self, duty: u16) -> Result<(), DispenseError> {
        self.channel
            .set_duty(duty)
            .map_err(|source| DispenseError::Hardware { slot: self.slot, source })
    }

    pub(crate) fn release(&mut self) -> Result<(), HardwareError> {
        self.channel.release()
    }
}

impl std::fmt::Debug for Actuator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Actuator")
            .field("slot", &self.slot)
            .field("pin", &self.pin())
            .field("driving", &self.is_driving())
            .finish()
    }
}
