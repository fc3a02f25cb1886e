//! Listener callbacks and the blocked-queue report.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::queue::ThreadSnapshot;

/// Diagnostics for one queue whose ping did not complete in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedReport {
    /// Checker name of the queue.
    pub queue_name: String,
    /// Where the queue is stuck: in its own task handling or in a probe.
    pub description: String,
    /// Name of the probe that was running, if the queue is stuck in one.
    pub blocked_probe: Option<String>,
    /// Time since the outstanding ping was posted.
    pub waiting_for: Duration,
    /// Snapshot of the queue's thread.
    pub thread: ThreadSnapshot,
}

impl fmt::Display for BlockedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (ping outstanding for {}ms)\n  at {}",
            self.description,
            self.waiting_for.as_millis(),
            self.thread
        )
    }
}

/// Receives everything the watchdog detects.
pub trait WatchdogListener: Send + Sync {
    /// A monitored queue missed its deadline.
    ///
    /// Called on the watchdog thread, without any watchdog lock held.
    fn on_blocked(&self, queue_name: &str, report: &BlockedReport);

    /// A single task ran longer than its queue's timeout.
    ///
    /// Called on the monitored queue's thread right after the task finished.
    fn on_task_overdue(&self, description: &str) {
        let _ = description;
    }

    /// A probe panicked. The remaining probes of the round still run.
    fn on_probe_failed(&self, probe_name: &str, message: &str) {
        let _ = (probe_name, message);
    }
}

/// Listener that writes every detection to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

impl WatchdogListener for LoggingListener {
    fn on_blocked(&self, queue_name: &str, report: &BlockedReport) {
        tracing::error!(
            queue = queue_name,
            waiting_ms = %report.waiting_for.as_millis(),
            probe = report.blocked_probe.as_deref(),
            "Queue blocked: {report}"
        );
    }

    fn on_task_overdue(&self, description: &str) {
        tracing::warn!(task = description, "Task overran its queue timeout");
    }

    fn on_probe_failed(&self, probe_name: &str, message: &str) {
        tracing::error!(probe = probe_name, panic = message, "Probe panicked");
    }
}
