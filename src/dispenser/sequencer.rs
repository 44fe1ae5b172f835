//! sequencer.rs
//! Sensor-gated release sequence for one container.
//!
//! Idle → Settling → Driving → Sampling → (Driving | Done) → Idle
//!
//! - Settling: fixed wait so the drop sensor from the previous release has cleared
//! - Driving: one full pass through the motion profile
//! - Sampling: read the drop sensor once; no drop means another pass
//! - Done: channel released back to a passive input on every exit path
//!
//! The retry loop is unbounded unless a `RetryLimit` is configured. A jammed
//! container or a disconnected sensor then blocks the caller indefinitely.

use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

use crate::dispenser::{
    DispenseError,
    actuator::Actuator,
    profile::MotionProfile,
};
use crate::hardware::{Delay, DropSensor};
use crate::utils::events::{DispenseEvent, EventRecorder};

/// Time for the vibration sensor to settle after the previous release.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    Settling,
    Driving,
    Sampling,
    Done,
}

impl SequencerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SequencerState::Idle => "idle",
            SequencerState::Settling => "settling",
            SequencerState::Driving => "driving",
            SequencerState::Sampling => "sampling",
            SequencerState::Done => "done",
        }
    }
}

/// Upper bounds on the retry loop. Both `None` means retry until the sensor fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryLimit {
    pub max_passes: Option<u32>,
    /// Commanded motion time (sum of holds), not wall-clock time.
    pub max_motion: Option<Duration>,
}

impl RetryLimit {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn passes(max_passes: u32) -> Self {
        Self {
            max_passes: Some(max_passes),
            max_motion: None,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_passes.is_none() && self.max_motion.is_none()
    }

    /// Whether another pass may start after `passes` passes and `motion` of driving.
    pub fn allows_another(&self, passes: u32, motion: Duration) -> bool {
        let under_passes = self.max_passes.is_none_or(|max| passes < max);
        let under_motion = self.max_motion.is_none_or(|max| motion < max);
        under_passes && under_motion
    }
}

/// Outcome of a confirmed release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispenseReport {
    pub slot: usize,
    pub pin: u8,
    pub passes: u32,
    pub duty_writes: u32,
    /// Commanded motion time across all passes.
    pub motion_time: Duration,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Tally {
    passes: u32,
    duty_writes: u32,
    motion: Duration,
}

pub struct Sequencer {
    profile: MotionProfile,
    settle_delay: Duration,
    limit: RetryLimit,
    state: SequencerState,
    events: Option<EventRecorder>,
}

impl Sequencer {
    pub fn new(profile: MotionProfile) -> Self {
        Self {
            profile,
            settle_delay: DEFAULT_SETTLE_DELAY,
            limit: RetryLimit::unbounded(),
            state: SequencerState::Idle,
            events: None,
        }
    }

    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    pub fn with_retry_limit(mut self, limit: RetryLimit) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_events(mut self, events: EventRecorder) -> Self {
        self.events = Some(events);
        self
    }

    pub fn profile(&self) -> &MotionProfile {
        &self.profile
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    pub fn retry_limit(&self) -> RetryLimit {
        self.limit
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Runs one release on `actuator`, blocking until the sensor confirms a drop.
    ///
    /// The actuator is released before returning, whether or not the drop was confirmed.
    pub fn dispense(
        &mut self,
        actuator: &mut Actuator,
        sensor: &mut dyn DropSensor,
        delay: &mut dyn Delay,
    ) -> Result<DispenseReport, DispenseError> {
        let started = Instant::now();
        let slot = actuator.slot();
        info!("[Sequencer] container {} (pin {}): dispense requested", slot, actuator.pin());
        self.record(DispenseEvent::Started { slot });

        // ====================================================================
        // Settling: previous release must not leak into this one's first sample
        // ====================================================================
        self.state = SequencerState::Settling;
        delay.delay(self.settle_delay);

        let mut tally = Tally::default();
        let outcome = self.drive_until_drop(actuator, sensor, delay, &mut tally);

        // ====================================================================
        // Done: park the pin as a passive input on every path
        // ====================================================================
        self.state = SequencerState::Done;
        let released = actuator.release();
        self.state = SequencerState::Idle;

        let (result, release_fault) = match (outcome, released) {
            (Ok(()), Ok(())) => (
                Ok(DispenseReport {
                    slot,
                    pin: actuator.pin(),
                    passes: tally.passes,
                    duty_writes: tally.duty_writes,
                    motion_time: tally.motion,
                    elapsed: started.elapsed(),
                }),
                None,
            ),
            (Err(e), Ok(())) => (Err(e), None),
            // the first fault is returned; the release fault must still be reported
            (Err(e), Err(source)) => {
                error!("[Sequencer] container {}: release failed: {}", slot, source);
                (Err(e), Some(source))
            }
            (Ok(()), Err(source)) => (Err(DispenseError::Hardware { slot, source }), None),
        };

        match &result {
            Ok(report) => {
                info!(
                    "[Sequencer] container {}: drop confirmed after {} pass(es), {} writes",
                    slot, report.passes, report.duty_writes
                );
                self.record(DispenseEvent::Finished { slot, passes: report.passes });
            }
            Err(e) => {
                let reason = match &release_fault {
                    Some(fault) => format!("{}; release failed: {}", e, fault),
                    None => e.to_string(),
                };
                self.record(DispenseEvent::Failed { slot, reason });
            }
        }

        result
    }

    fn drive_until_drop(
        &mut self,
        actuator: &mut Actuator,
        sensor: &mut dyn DropSensor,
        delay: &mut dyn Delay,
        tally: &mut Tally,
    ) -> Result<(), DispenseError> {
        let slot = actuator.slot();

        loop {
            self.state = SequencerState::Driving;
            for step in self.profile.steps() {
                actuator.set_duty(step.duty)?;
                tally.duty_writes += 1;
                delay.delay(step.hold);
                tally.motion += step.hold;
            }
            tally.passes += 1;

            self.state = SequencerState::Sampling;
            let level = sensor
                .sample()
                .map_err(|source| DispenseError::Hardware { slot, source })?;
            debug!(
                "[Sequencer] container {}: pass {} sensor={}",
                slot,
                tally.passes,
                level.as_bit()
            );
            self.record(DispenseEvent::PassCompleted {
                slot,
                pass: tally.passes,
                dropped: level.is_drop(),
            });

            if level.is_drop() {
                return Ok(());
            }

            if !self.limit.allows_another(tally.passes, tally.motion) {
                warn!(
                    "[Sequencer] container {}: no drop after {} passes, giving up",
                    slot, tally.passes
                );
                return Err(DispenseError::Unconfirmed {
                    slot,
                    passes: tally.passes,
                });
            }
        }
    }

    fn record(&self, event: DispenseEvent) {
        if let Some(events) = &self.events {
            events.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{
        BoardLog, BoardOp, HardwareError, RecordingDelay, ScriptedSensor, SimServo,
    };

    const SERVO_PIN: u8 = 5;
    const SENSOR_PIN: u8 = 14;

    fn rig(bits: &[u8]) -> (BoardLog, Actuator, ScriptedSensor, RecordingDelay) {
        let log = BoardLog::new();
        let actuator = Actuator::new(1, Box::new(SimServo::new(SERVO_PIN, log.clone())));
        let sensor = ScriptedSensor::from_bits(SENSOR_PIN, bits, log.clone());
        let delay = RecordingDelay::new(log.clone());
        (log, actuator, sensor, delay)
    }

    #[test]
    fn immediate_drop_runs_one_pass() {
        let (log, mut act, mut sensor, mut delay) = rig(&[1]);
        let mut seq = Sequencer::new(MotionProfile::default());

        let report = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

        assert_eq!(report.passes, 1);
        assert_eq!(report.duty_writes, 6);
        assert_eq!(log.duty_writes(SERVO_PIN), vec![100, 40, 30, 25, 20, 15]);
        assert_eq!(log.samples().len(), 1);
    }

    #[test]
    fn one_miss_then_drop_runs_two_passes() {
        let (log, mut act, mut sensor, mut delay) = rig(&[0, 1]);
        let mut seq = Sequencer::new(MotionProfile::default());

        let report = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

        assert_eq!(report.passes, 2);
        assert_eq!(log.total_duty_writes(), 12);
        assert_eq!(report.motion_time, Duration::from_millis(4400));
    }

    #[test]
    fn n_misses_run_n_plus_one_passes() {
        for n in [0usize, 1, 3, 7] {
            let mut bits = vec![0u8; n];
            bits.push(1);
            let (log, mut act, mut sensor, mut delay) = rig(&bits);
            let mut seq = Sequencer::new(MotionProfile::default());

            let report = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

            assert_eq!(report.passes as usize, n + 1);
            assert_eq!(log.total_duty_writes(), 6 * (n + 1));
            assert_eq!(log.samples().len(), n + 1);
        }
    }

    #[test]
    fn settle_precedes_motion_and_motion_precedes_sampling() {
        let (log, mut act, mut sensor, mut delay) = rig(&[1]);
        let mut seq = Sequencer::new(MotionProfile::default());
        seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

        let ops = log.ops();
        assert_eq!(ops[0], BoardOp::Delay(DEFAULT_SETTLE_DELAY));
        assert_eq!(ops[1], BoardOp::Duty { pin: SERVO_PIN, duty: 100 });

        let first_sample = ops
            .iter()
            .position(|op| matches!(op, BoardOp::Sample { .. }))
            .unwrap();
        let last_write = ops
            .iter()
            .rposition(|op| matches!(op, BoardOp::Duty { .. }))
            .unwrap();
        assert!(last_write < first_sample);
    }

    #[test]
    fn settle_delay_elapses_even_when_sensor_already_high() {
        let (log, mut act, mut sensor, mut delay) = rig(&[1]);
        let mut seq = Sequencer::new(MotionProfile::default())
            .with_settle_delay(Duration::from_millis(1500));
        seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

        assert_eq!(log.delays()[0], Duration::from_millis(1500));
    }

    #[test]
    fn each_pass_ends_at_neutral_and_channel_is_released() {
        let (log, mut act, mut sensor, mut delay) = rig(&[0, 0, 1]);
        let mut seq = Sequencer::new(MotionProfile::default());
        seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

        let writes = log.duty_writes(SERVO_PIN);
        for pass in writes.chunks(6) {
            assert_eq!(*pass.last().unwrap(), 15);
        }
        assert_eq!(log.releases(SERVO_PIN), 1);
        assert_eq!(log.ops().last(), Some(&BoardOp::Release { pin: SERVO_PIN }));
        assert!(!act.is_driving());
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    #[test]
    fn pass_limit_stops_stuck_sensor_and_releases() {
        let log = BoardLog::new();
        let mut act = Actuator::new(3, Box::new(SimServo::new(12, log.clone())));
        let mut sensor = ScriptedSensor::stuck(SENSOR_PIN, log.clone());
        let mut delay = RecordingDelay::new(log.clone());
        let mut seq =
            Sequencer::new(MotionProfile::default()).with_retry_limit(RetryLimit::passes(4));

        let err = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap_err();

        assert!(matches!(err, DispenseError::Unconfirmed { slot: 3, passes: 4 }));
        assert_eq!(log.total_duty_writes(), 24);
        assert_eq!(log.releases(12), 1);
        assert!(!act.is_driving());
    }

    #[test]
    fn motion_limit_counts_commanded_time() {
        let log = BoardLog::new();
        let mut act = Actuator::new(1, Box::new(SimServo::new(SERVO_PIN, log.clone())));
        let mut sensor = ScriptedSensor::stuck(SENSOR_PIN, log.clone());
        let mut delay = RecordingDelay::new(log.clone());
        let limit = RetryLimit {
            max_passes: None,
            max_motion: Some(Duration::from_secs(5)),
        };
        let mut seq = Sequencer::new(MotionProfile::default()).with_retry_limit(limit);

        let err = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap_err();

        // 2.2 s per pass: passes start at 0, 2.2 and 4.4 s
        assert!(matches!(err, DispenseError::Unconfirmed { passes: 3, .. }));
    }

    #[test]
    fn hardware_fault_still_releases_channel() {
        let log = BoardLog::new();
        let servo = SimServo::new(SERVO_PIN, log.clone()).failing_after(2);
        let mut act = Actuator::new(1, Box::new(servo));
        let mut sensor = ScriptedSensor::from_bits(SENSOR_PIN, &[1], log.clone());
        let mut delay = RecordingDelay::new(log.clone());
        let mut seq = Sequencer::new(MotionProfile::default());

        let err = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap_err();

        assert!(matches!(err, DispenseError::Hardware { slot: 1, .. }));
        assert_eq!(log.releases(SERVO_PIN), 1);
        assert!(log.samples().is_empty());
    }

    #[test]
    fn sensor_fault_still_releases_channel() {
        let log = BoardLog::new();
        let mut act = Actuator::new(2, Box::new(SimServo::new(4, log.clone())));
        let mut sensor = ScriptedSensor::from_bits(SENSOR_PIN, &[0], log.clone()).failing_after(1);
        let mut delay = RecordingDelay::new(log.clone());
        let mut seq = Sequencer::new(MotionProfile::default());

        let err = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap_err();

        assert!(matches!(
            err,
            DispenseError::Hardware {
                slot: 2,
                source: HardwareError::SensorRead { pin: SENSOR_PIN, .. },
            }
        ));
        // first pass sampled fine, second pass sample faulted
        assert_eq!(log.total_duty_writes(), 12);
        assert_eq!(log.releases(4), 1);
        assert!(!act.is_driving());
        assert_eq!(seq.state(), SequencerState::Idle);
    }

    #[test]
    fn failed_release_after_drive_fault_is_reported() {
        let log = BoardLog::new();
        let servo = SimServo::new(SERVO_PIN, log.clone())
            .failing_after(0)
            .failing_release();
        let mut act = Actuator::new(1, Box::new(servo));
        let mut sensor = ScriptedSensor::from_bits(SENSOR_PIN, &[1], log.clone());
        let mut delay = RecordingDelay::new(log.clone());
        let events = EventRecorder::new();
        let mut seq = Sequencer::new(MotionProfile::default()).with_events(events.clone());

        let err = seq.dispense(&mut act, &mut sensor, &mut delay).unwrap_err();

        assert!(matches!(
            err,
            DispenseError::Hardware { slot: 1, source: HardwareError::PwmWrite { duty: 100, .. } }
        ));
        assert_eq!(log.releases(SERVO_PIN), 0);
        match events.drain().last() {
            Some(DispenseEvent::Failed { slot: 1, reason }) => {
                assert!(reason.contains("PWM write"), "{}", reason);
                assert!(reason.contains("release failed"), "{}", reason);
            }
            other => panic!("unexpected last event: {:?}", other),
        }
    }

    #[test]
    fn events_follow_the_sequence() {
        let (_log, mut act, mut sensor, mut delay) = rig(&[0, 1]);
        let events = EventRecorder::new();
        let mut seq = Sequencer::new(MotionProfile::default()).with_events(events.clone());
        seq.dispense(&mut act, &mut sensor, &mut delay).unwrap();

        let drained = events.drain();
        assert_eq!(
            drained,
            vec![
                DispenseEvent::Started { slot: 1 },
                DispenseEvent::PassCompleted { slot: 1, pass: 1, dropped: false },
                DispenseEvent::PassCompleted { slot: 1, pass: 2, dropped: true },
                DispenseEvent::Finished { slot: 1, passes: 2 },
            ]
        );
    }

    #[test]
    fn retry_limit_bounds() {
        let unbounded = RetryLimit::unbounded();
        assert!(unbounded.is_unbounded());
        assert!(unbounded.allows_another(u32::MAX - 1, Duration::from_secs(3600)));

        let two = RetryLimit::passes(2);
        assert!(two.allows_another(1, Duration::ZERO));
        assert!(!two.allows_another(2, Duration::ZERO));
    }
}
