//! Shared helpers for the integration tests.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use parking_lot::{Condvar, Mutex};
use queuewatch::prelude::*;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::{Duration, Instant};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Generous upper bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(10);

/// Everything a [`RecordingListener`] has seen.
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub blocked: Vec<BlockedReport>,
    pub overdue: Vec<String>,
    pub probe_failures: Vec<(String, String)>,
}

impl Recorded {
    pub fn blocked_for(&self, queue_name: &str) -> usize {
        self.blocked
            .iter()
            .filter(|report| report.queue_name == queue_name)
            .count()
    }
}

/// Listener that keeps every callback and lets tests wait on them.
#[derive(Debug, Default)]
pub struct RecordingListener {
    recorded: Mutex<Recorded>,
    changed: Condvar,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> Recorded {
        self.recorded.lock().clone()
    }

    /// Block until `done` holds or `timeout` elapses. Returns whether it held.
    pub fn wait_until(&self, timeout: Duration, done: impl Fn(&Recorded) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut recorded = self.recorded.lock();
        while !done(&recorded) {
            if self.changed.wait_until(&mut recorded, deadline).timed_out() {
                return done(&recorded);
            }
        }
        true
    }

    fn record(&self, update: impl FnOnce(&mut Recorded)) {
        update(&mut self.recorded.lock());
        self.changed.notify_all();
    }
}

impl WatchdogListener for RecordingListener {
    fn on_blocked(&self, _queue_name: &str, report: &BlockedReport) {
        self.record(|recorded| recorded.blocked.push(report.clone()));
    }

    fn on_task_overdue(&self, description: &str) {
        self.record(|recorded| recorded.overdue.push(description.to_string()));
    }

    fn on_probe_failed(&self, probe_name: &str, message: &str) {
        self.record(|recorded| {
            recorded
                .probe_failures
                .push((probe_name.to_string(), message.to_string()));
        });
    }
}

pub fn config(interval: Duration) -> WatchdogResult<WatchdogConfig> {
    WatchdogConfig::builder()
        .check_interval(interval)
        .main_queue_timeout(interval)
        .build()
}

/// Occupy `queue` until the returned sender is used or dropped.
pub fn park(queue: &WorkerQueue, label: &str) -> Result<mpsc::Sender<()>, QueueError> {
    let (tx, rx) = mpsc::channel::<()>();
    queue.post(
        label,
        Box::new(move || {
            drop(rx.recv());
        }),
    )?;
    Ok(tx)
}

/// Poll `done` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}
