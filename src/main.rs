//! # Pill Dispenser Entry Point
//!
//! Runs the dispenser controller on a host against the simulated board.
//! Servo writes are recorded, the drop sensor fires at random with the
//! configured probability, and dwell times are real (spin-sleep timed).
//!
//! ## Modes
//! - **Schedule:** sync the clock, then poll the schedule and dispense due containers.
//! - **Test run:** one dose from every container, in order.
//! - **Trigger page:** serve the manual trigger page over HTTP.
//!
//! ## Outputs
//! - `data/logs/dispense_events.csv` — dispense/pass events (nanosecond timestamps).
//!
//! Configuration comes from `DISPENSER_CONFIG` (default `dispenser.json`); log
//! level from `RUST_LOG`.

use pill_dispenser::{
    config::Config,
    dispenser::Dispenser,
    hardware::{BoardLog, RandomSensor, SimServo, SpinDelay},
    network::{Backoff, HostTimeSync, sync_blocking},
    schedule::{SchedulePoller, SystemClock},
    trigger::TriggerServer,
    utils::events::{DEFAULT_EVENT_LOG, EventRecorder},
};

use log::{error, info};
use std::{
    io::{Write, stdin, stdout},
    path::PathBuf,
    process,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

fn main() {
    env_logger::init();
    info!("=== PILL DISPENSER START ===");

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!("[Main] configuration error: {}", e);
            process::exit(1);
        }
    };

    let events = EventRecorder::new();
    let exporter_running = Arc::new(AtomicBool::new(true));
    let exporter = events.start_exporter(PathBuf::from(DEFAULT_EVENT_LOG), exporter_running.clone());

    let board = BoardLog::new();
    let mut dispenser = build_dispenser(&config, &board, events);

    loop {
        let choice = prompt_menu();
        match choice.as_str() {
            "1" | "" => run_schedule(&config, &mut dispenser),
            "2" => run_test(&mut dispenser),
            "3" => run_trigger_page(&config, &mut dispenser),
            "4" => {
                println!("Exiting. Goodbye!");
                break;
            }
            other => {
                println!("Unrecognized option '{}', please try again.", other);
            }
        }
    }

    exporter_running.store(false, Ordering::Release);
    if exporter.join().is_err() {
        error!("[Main] event exporter panicked");
    }
    info!("[Main] {} board operations recorded", board.ops().len());
    info!("=== PILL DISPENSER FINISHED ===");
}

fn build_dispenser(config: &Config, board: &BoardLog, events: EventRecorder) -> Dispenser {
    let servo_log = board.clone();
    Dispenser::from_config(
        config,
        |pin, hz| {
            info!("[Main] servo on pin {} at {} Hz", pin, hz);
            Box::new(SimServo::new(pin, servo_log.clone()).with_frequency(hz))
        },
        Box::new(RandomSensor::new(
            config.sensor_pin,
            config.sim_drop_probability,
            board.clone(),
        )),
        Box::new(SpinDelay::new()),
        Some(events),
    )
}

fn prompt_menu() -> String {
    println!("\n┌─────────────────────────────────────────────┐");
    println!("│     SELECT DISPENSER MODE                   │");
    println!("├─────────────────────────────────────────────┤");
    println!("│  1) Schedule (poll clock, dispense due)     │");
    println!("│  2) Test run (every container once)         │");
    println!("│  3) Trigger page (HTTP)                     │");
    println!("│  4) Exit                                    │");
    println!("└─────────────────────────────────────────────┘");
    print!("Select [1/2/3/4] (default: 1): ");
    let _ = stdout().flush();

    let mut input = String::new();
    let _ = stdin().read_line(&mut input);
    input.trim().to_string()
}

/// Clears `running` when Enter is pressed.
fn stop_on_enter(running: Arc<AtomicBool>) -> thread::JoinHandle<()> {
    println!("Press Enter to stop and return to the menu.");
    thread::spawn(move || {
        let mut input = String::new();
        let _ = stdin().read_line(&mut input);
        running.store(false, Ordering::Release);
    })
}

fn run_schedule(config: &Config, dispenser: &mut Dispenser) {
    let schedule = match config.schedule() {
        Ok(s) => s,
        Err(e) => {
            error!("[Main] {}", e);
            return;
        }
    };
    if schedule.is_empty() {
        println!("No dispense times configured.");
        return;
    }

    let running = Arc::new(AtomicBool::new(true));
    let stopper = stop_on_enter(running.clone());

    if sync_blocking(&mut HostTimeSync, Backoff::default(), &running).is_some() {
        let mut poller = SchedulePoller::new(
            schedule,
            SystemClock::new(config.utc_offset_hours),
            config.poll_period(),
        );
        poller.run(dispenser, &running);
    }

    let _ = stopper.join();
}

fn run_test(dispenser: &mut Dispenser) {
    match dispenser.dispense_all() {
        Ok(reports) => {
            for r in reports {
                println!(
                    "Container {} (pin {}): {} pass(es), {:.1}s",
                    r.slot,
                    r.pin,
                    r.passes,
                    r.elapsed.as_secs_f64()
                );
            }
        }
        Err(e) => println!("Test run stopped: {}", e),
    }
}

fn run_trigger_page(config: &Config, dispenser: &mut Dispenser) {
    let schedule = config.schedule().unwrap_or_default();
    let server = match TriggerServer::bind(&config.http_addr, schedule) {
        Ok(s) => s,
        Err(e) => {
            error!("[Main] {}", e);
            return;
        }
    };
    println!("Trigger page live at: http://{}", config.http_addr);

    let running = Arc::new(AtomicBool::new(true));
    let stopper = stop_on_enter(running.clone());
    server.serve(dispenser, &running);
    let _ = stopper.join();
}
