use criterion::{criterion_group, criterion_main, Criterion};
use std::time::Duration;

use pill_dispenser::dispenser::{Actuator, MotionProfile, Sequencer};
use pill_dispenser::hardware::{BoardLog, NoopDelay, ScriptedSensor, SimServo};

// Sequencer overhead with zero dwell: profile stepping, sensor sampling and release.
fn sequencer_overhead_bench(c: &mut Criterion) {
    let log = BoardLog::new();
    let mut actuator = Actuator::new(1, Box::new(SimServo::new(5, log.clone())));
    let mut sensor = ScriptedSensor::from_bits(14, &[], log.clone());
    let mut delay = NoopDelay;
    let mut sequencer = Sequencer::new(MotionProfile::default()).with_settle_delay(Duration::ZERO);

    c.bench_function("dispense_three_passes", |b| {
        b.iter(|| {
            log.clear();
            sensor.extend_bits(&[0, 0, 1]);
            let report = sequencer
                .dispense(&mut actuator, &mut sensor, &mut delay)
                .unwrap();
            assert_eq!(report.passes, 3);
        })
    });
}

criterion_group!(benches, sequencer_overhead_bench);
criterion_main!(benches);
