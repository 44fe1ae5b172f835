//! device.rs
//! The dispenser device: every configured container actuator plus the one drop
//! sensor they share.
//!
//! Dispenses are strictly sequential. `dispense` blocks until the release is
//! confirmed (or the retry limit trips), so only one container moves at a time.

use log::{error, info};

use crate::config::Config;
use crate::dispenser::{Actuator, DispenseError, DispenseReport, Sequencer};
use crate::hardware::{Delay, DropSensor, ServoChannel};
use crate::utils::events::EventRecorder;

pub struct Dispenser {
    actuators: Vec<Actuator>,
    sensor: Box<dyn DropSensor>,
    delay: Box<dyn Delay>,
    sequencer: Sequencer,
}

impl Dispenser {
    pub fn new(
        actuators: Vec<Actuator>,
        sensor: Box<dyn DropSensor>,
        delay: Box<dyn Delay>,
        sequencer: Sequencer,
    ) -> Self {
        Self {
            actuators,
            sensor,
            delay,
            sequencer,
        }
    }

    /// Builds one actuator per configured container, numbering them from 1.
    ///
    /// `open_servo` opens the drive channel for a pin at the configured PWM frequency.
    pub fn from_config<F>(
        config: &Config,
        mut open_servo: F,
        sensor: Box<dyn DropSensor>,
        delay: Box<dyn Delay>,
        events: Option<EventRecorder>,
    ) -> Self
    where
        F: FnMut(u8, u32) -> Box<dyn ServoChannel>,
    {
        let actuators = config
            .containers
            .iter()
            .enumerate()
            .map(|(i, c)| Actuator::new(i + 1, open_servo(c.pin, config.pwm_frequency_hz)))
            .collect();

        let mut sequencer = Sequencer::new(config.motion_profile())
            .with_settle_delay(config.settle_delay())
            .with_retry_limit(config.retry_limit());
        if let Some(events) = events {
            sequencer = sequencer.with_events(events);
        }

        Self::new(actuators, sensor, delay, sequencer)
    }

    pub fn slots(&self) -> Vec<usize> {
        self.actuators.iter().map(|a| a.slot()).collect()
    }

    pub fn actuator(&self, slot: usize) -> Option<&Actuator> {
        self.actuators.iter().find(|a| a.slot() == slot)
    }

    pub fn sensor_pin(&self) -> u8 {
        self.sensor.pin()
    }

    pub fn sequencer(&self) -> &Sequencer {
        &self.sequencer
    }

    /// Releases one dose from container `slot`.
    pub fn dispense(&mut self, slot: usize) -> Result<DispenseReport, DispenseError> {
        let actuator = self
            .actuators
            .iter_mut()
            .find(|a| a.slot() == slot)
            .ok_or(DispenseError::UnknownActuator { slot })?;

        let result = self
            .sequencer
            .dispense(actuator, self.sensor.as_mut(), self.delay.as_mut());
        if let Err(e) = &result {
            error!("[Dispenser] {}", e);
        }
        result
    }

    /// Test run: one dose from every container in order, stopping at the first failure.
    pub fn dispense_all(&mut self) -> Result<Vec<DispenseReport>, DispenseError> {
        info!("[Dispenser] test run over {} containers", self.actuators.len());
        let mut reports = Vec::with_capacity(self.actuators.len());
        for slot in self.slots() {
            reports.push(self.dispense(slot)?);
        }
        Ok(reports)
    }
}
