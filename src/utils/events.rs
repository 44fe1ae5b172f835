//! events.rs
//! Dispense event recording for post-run diagnostics.
//!
//! - **EventRecorder:** lock-free bounded queue; `record()` never blocks the sequencer.
//! - **Exporter:** background thread draining the queue into a CSV log.
//!
//! Event trace per dispense: Started → PassCompleted (one per pass) → Finished | Failed.

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::error;
use serde::Serialize;
use std::{
    fs::{File, create_dir_all},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

const EVENT_QUEUE_CAPACITY: usize = 4_096;
const EXPORTER_POLL_MS: u64 = 20;

pub const DEFAULT_EVENT_LOG: &str = "data/logs/dispense_events.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispenseEvent {
    Started { slot: usize },
    PassCompleted { slot: usize, pass: u32, dropped: bool },
    Finished { slot: usize, passes: u32 },
    Failed { slot: usize, reason: String },
}

impl DispenseEvent {
    pub fn slot(&self) -> usize {
        match self {
            DispenseEvent::Started { slot }
            | DispenseEvent::PassCompleted { slot, .. }
            | DispenseEvent::Finished { slot, .. }
            | DispenseEvent::Failed { slot, .. } => *slot,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DispenseEvent::Started { .. } => "started",
            DispenseEvent::PassCompleted { .. } => "pass_completed",
            DispenseEvent::Finished { .. } => "finished",
            DispenseEvent::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone)]
struct Stamped {
    ts_ns: u64,
    event: DispenseEvent,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    ts_ns: u64,
    slot: usize,
    event: &'a str,
    pass: Option<u32>,
    dropped: Option<bool>,
    detail: &'a str,
}

impl<'a> From<&'a Stamped> for CsvRow<'a> {
    fn from(s: &'a Stamped) -> Self {
        let (pass, dropped, detail) = match &s.event {
            DispenseEvent::PassCompleted { pass, dropped, .. } => (Some(*pass), Some(*dropped), ""),
            DispenseEvent::Finished { passes, .. } => (Some(*passes), Some(true), ""),
            DispenseEvent::Failed { reason, .. } => (None, None, reason.as_str()),
            DispenseEvent::Started { .. } => (None, None, ""),
        };
        CsvRow {
            ts_ns: s.ts_ns,
            slot: s.event.slot(),
            event: s.event.name(),
            pass,
            dropped,
            detail,
        }
    }
}

/// Non-blocking event recorder. Clones share the same queue and clock origin.
///
/// Drops silently when the queue is full.
#[derive(Clone)]
pub struct EventRecorder {
    queue: Arc<ArrayQueue<Stamped>>,
    run_start: Instant,
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRecorder {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(EVENT_QUEUE_CAPACITY)),
            run_start: Instant::now(),
        }
    }

    #[inline]
    pub fn record(&self, event: DispenseEvent) {
        let _ = self.queue.push(Stamped {
            ts_ns: self.now_ns(),
            event,
        });
    }

    /// Nanoseconds since the recorder was created.
    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.run_start.elapsed().as_nanos() as u64
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Removes and returns everything queued so far.
    pub fn drain(&self) -> Vec<DispenseEvent> {
        std::iter::from_fn(|| self.queue.pop()).map(|s| s.event).collect()
    }

    /// Spawns a thread draining the queue into `output_csv` until `running` is
    /// cleared, then writes whatever is left and flushes.
    pub fn start_exporter(
        &self,
        output_csv: PathBuf,
        running: Arc<AtomicBool>,
    ) -> thread::JoinHandle<()> {
        let queue = self.queue.clone();

        thread::spawn(move || {
            if let Some(dir) = output_csv.parent() {
                if let Err(e) = create_dir_all(dir) {
                    error!("[Events] failed to create {:?}: {}", dir, e);
                    return;
                }
            }

            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("[Events] failed to create {:?}: {}", output_csv, e);
                    return;
                }
            };
            let mut writer = Writer::from_writer(file);

            loop {
                let mut wrote = false;
                while let Some(stamped) = queue.pop() {
                    if let Err(e) = writer.serialize(CsvRow::from(&stamped)) {
                        error!("[Events] write failed: {}", e);
                    }
                    wrote = true;
                }
                if wrote {
                    let _ = writer.flush();
                }

                if !running.load(Ordering::Acquire) && queue.is_empty() {
                    break;
                }
                thread::sleep(Duration::from_millis(EXPORTER_POLL_MS));
            }

            let _ = writer.flush();
        })
    }
}
