//! simulated.rs
//! Simulated dispenser board: servo channels, drop sensors and a delay that all
//! append to one shared operation log.
//! - SimServo records every duty write and release against its pin
//! - ScriptedSensor replays a fixed sequence of levels, then holds a fallback level
//! - RandomSensor fires with a fixed probability per sample (interactive host runs)
//! - RecordingDelay logs the requested wait instead of sleeping
//!
//! The log keeps global ordering, so settle → drive → sample sequences can be
//! checked across devices.

use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc, time::Duration};

use crate::dispenser::profile::DEFAULT_PWM_FREQUENCY_HZ;
use crate::hardware::{Delay, DropSensor, HardwareError, SensorLevel, ServoChannel};

/// One operation performed on the simulated board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardOp {
    Delay(Duration),
    Duty { pin: u8, duty: u16 },
    Sample { pin: u8, level: SensorLevel },
    Release { pin: u8 },
}

/// Shared, cloneable handle to the board's operation log.
#[derive(Debug, Clone, Default)]
pub struct BoardLog {
    ops: Arc<Mutex<Vec<BoardOp>>>,
}

impl BoardLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, op: BoardOp) {
        self.ops.lock().push(op);
    }

    /// Snapshot of every operation so far.
    pub fn ops(&self) -> Vec<BoardOp> {
        self.ops.lock().clone()
    }

    pub fn clear(&self) {
        self.ops.lock().clear();
    }

    /// Duty values written to `pin`, in order.
    pub fn duty_writes(&self, pin: u8) -> Vec<u16> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                BoardOp::Duty { pin: p, duty } if *p == pin => Some(*duty),
                _ => None,
            })
            .collect()
    }

    pub fn total_duty_writes(&self) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| matches!(op, BoardOp::Duty { .. }))
            .count()
    }

    pub fn samples(&self) -> Vec<SensorLevel> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                BoardOp::Sample { level, .. } => Some(*level),
                _ => None,
            })
            .collect()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.ops
            .lock()
            .iter()
            .filter_map(|op| match op {
                BoardOp::Delay(d) => Some(*d),
                _ => None,
            })
            .collect()
    }

    pub fn releases(&self, pin: u8) -> usize {
        self.ops
            .lock()
            .iter()
            .filter(|op| matches!(op, BoardOp::Release { pin: p } if *p == pin))
            .count()
    }
}

/// PWM servo channel that records its writes.
pub struct SimServo {
    pin: u8,
    frequency_hz: u32,
    driving: bool,
    fail_after: Option<usize>,
    release_fails: bool,
    writes: usize,
    log: BoardLog,
}

impl SimServo {
    pub fn new(pin: u8, log: BoardLog) -> Self {
        Self {
            pin,
            frequency_hz: DEFAULT_PWM_FREQUENCY_HZ,
            driving: false,
            fail_after: None,
            release_fails: false,
            writes: 0,
            log,
        }
    }

    pub fn with_frequency(mut self, frequency_hz: u32) -> Self {
        self.frequency_hz = frequency_hz;
        self
    }

    /// Fail every duty write after the first `n` succeed.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Every release fails and leaves the channel driving.
    pub fn failing_release(mut self) -> Self {
        self.release_fails = true;
        self
    }
}

impl ServoChannel for SimServo {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn set_duty(&mut self, duty: u16) -> Result<(), HardwareError> {
        if let Some(limit) = self.fail_after {
            if self.writes >= limit {
                return Err(HardwareError::PwmWrite {
                    pin: self.pin,
                    duty,
                    reason: "simulated channel fault".into(),
                });
            }
        }
        self.writes += 1;
        self.driving = true;
        self.log.push(BoardOp::Duty { pin: self.pin, duty });
        Ok(())
    }

    fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    fn release(&mut self) -> Result<(), HardwareError> {
        if self.release_fails {
            return Err(HardwareError::Release {
                pin: self.pin,
                reason: "simulated channel fault".into(),
            });
        }
        self.driving = false;
        self.log.push(BoardOp::Release { pin: self.pin });
        Ok(())
    }

    fn is_driving(&self) -> bool {
        self.driving
    }
}

/// Drop sensor replaying a scripted sequence of levels.
pub struct ScriptedSensor {
    pin: u8,
    script: VecDeque<SensorLevel>,
    fallback: SensorLevel,
    fail_after: Option<usize>,
    reads: usize,
    log: BoardLog,
}

impl ScriptedSensor {
    /// Replays `bits` (0 = no drop, anything else = drop); once exhausted keeps
    /// reporting a drop.
    pub fn from_bits(pin: u8, bits: &[u8], log: BoardLog) -> Self {
        Self {
            pin,
            script: bits.iter().map(|b| SensorLevel::from_bit(*b)).collect(),
            fallback: SensorLevel::Dropped,
            fail_after: None,
            reads: 0,
            log,
        }
    }

    /// A sensor that never fires: jammed container or disconnected input.
    pub fn stuck(pin: u8, log: BoardLog) -> Self {
        Self {
            pin,
            script: VecDeque::new(),
            fallback: SensorLevel::NoDrop,
            fail_after: None,
            reads: 0,
            log,
        }
    }

    /// Fail every read after the first `n` succeed.
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Appends more levels to the end of the script.
    pub fn extend_bits(&mut self, bits: &[u8]) {
        self.script.extend(bits.iter().map(|b| SensorLevel::from_bit(*b)));
    }

    pub fn remaining(&self) -> usize {
        self.script.len()
    }
}

impl DropSensor for ScriptedSensor {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn sample(&mut self) -> Result<SensorLevel, HardwareError> {
        if self.fail_after.is_some_and(|limit| self.reads >= limit) {
            return Err(HardwareError::SensorRead {
                pin: self.pin,
                reason: "simulated input fault".into(),
            });
        }
        self.reads += 1;
        let level = self.script.pop_front().unwrap_or(self.fallback);
        self.log.push(BoardOp::Sample { pin: self.pin, level });
        Ok(level)
    }
}

/// Drop sensor that fires with a fixed probability per sample.
pub struct RandomSensor {
    pin: u8,
    drop_probability: f64,
    log: BoardLog,
}

impl RandomSensor {
    pub fn new(pin: u8, drop_probability: f64, log: BoardLog) -> Self {
        Self {
            pin,
            drop_probability: drop_probability.clamp(0.0, 1.0),
            log,
        }
    }
}

impl DropSensor for RandomSensor {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn sample(&mut self) -> Result<SensorLevel, HardwareError> {
        let level = if rand::random_bool(self.drop_probability) {
            SensorLevel::Dropped
        } else {
            SensorLevel::NoDrop
        };
        self.log.push(BoardOp::Sample { pin: self.pin, level });
        Ok(level)
    }
}

/// Delay that logs the requested duration without sleeping.
#[derive(Clone)]
pub struct RecordingDelay {
    log: BoardLog,
}

impl RecordingDelay {
    pub fn new(log: BoardLog) -> Self {
        Self { log }
    }
}

impl Delay for RecordingDelay {
    fn delay(&mut self, duration: Duration) {
        self.log.push(BoardOp::Delay(duration));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servo_records_writes_and_release() {
        let log = BoardLog::new();
        let mut servo = SimServo::new(5, log.clone());
        assert!(!servo.is_driving());

        servo.set_duty(100).unwrap();
        servo.set_duty(15).unwrap();
        assert!(servo.is_driving());

        servo.release().unwrap();
        assert!(!servo.is_driving());
        assert_eq!(log.duty_writes(5), vec![100, 15]);
        assert_eq!(log.releases(5), 1);
    }

    #[test]
    fn servo_fault_injection() {
        let log = BoardLog::new();
        let mut servo = SimServo::new(4, log.clone()).failing_after(1);
        assert!(servo.set_duty(100).is_ok());
        assert!(matches!(
            servo.set_duty(40),
            Err(HardwareError::PwmWrite { pin: 4, duty: 40, .. })
        ));
        assert_eq!(log.total_duty_writes(), 1);
    }

    #[test]
    fn servo_release_fault_keeps_driving() {
        let log = BoardLog::new();
        let mut servo = SimServo::new(15, log.clone()).failing_release();
        servo.set_duty(100).unwrap();
        assert!(matches!(servo.release(), Err(HardwareError::Release { pin: 15, .. })));
        assert!(servo.is_driving());
        assert_eq!(log.releases(15), 0);
    }

    #[test]
    fn servo_frequency_defaults_to_forty_hz() {
        let log = BoardLog::new();
        assert_eq!(SimServo::new(5, log.clone()).frequency_hz(), 40);
        assert_eq!(SimServo::new(5, log).with_frequency(50).frequency_hz(), 50);
    }

    #[test]
    fn scripted_sensor_fault_injection() {
        let log = BoardLog::new();
        let mut sensor = ScriptedSensor::from_bits(14, &[0, 1], log.clone()).failing_after(1);
        assert_eq!(sensor.sample().unwrap(), SensorLevel::NoDrop);
        assert!(matches!(sensor.sample(), Err(HardwareError::SensorRead { pin: 14, .. })));
        assert_eq!(log.samples().len(), 1);
        assert_eq!(sensor.remaining(), 1);
    }

    #[test]
    fn scripted_sensor_replays_then_falls_back() {
        let log = BoardLog::new();
        let mut sensor = ScriptedSensor::from_bits(14, &[0, 0], log.clone());
        assert_eq!(sensor.sample().unwrap(), SensorLevel::NoDrop);
        assert_eq!(sensor.sample().unwrap(), SensorLevel::NoDrop);
        assert_eq!(sensor.sample().unwrap(), SensorLevel::Dropped);
        assert_eq!(log.samples().len(), 3);
    }

    #[test]
    fn stuck_sensor_never_fires() {
        let log = BoardLog::new();
        let mut sensor = ScriptedSensor::stuck(14, log);
        for _ in 0..50 {
            assert_eq!(sensor.sample().unwrap(), SensorLevel::NoDrop);
        }
    }

    #[test]
    fn random_sensor_extremes() {
        let log = BoardLog::new();
        let mut always = RandomSensor::new(14, 1.0, log.clone());
        let mut never = RandomSensor::new(14, 0.0, log);
        for _ in 0..20 {
            assert!(always.sample().unwrap().is_drop());
            assert!(!never.sample().unwrap().is_drop());
        }
    }

    #[test]
    fn recording_delay_keeps_order_with_writes() {
        let log = BoardLog::new();
        let mut delay = RecordingDelay::new(log.clone());
        let mut servo = SimServo::new(12, log.clone());

        delay.delay(Duration::from_secs(2));
        servo.set_duty(100).unwrap();

        assert_eq!(
            log.ops(),
            vec![
                BoardOp::Delay(Duration::from_secs(2)),
                BoardOp::Duty { pin: 12, duty: 100 },
            ]
        );
    }
}
