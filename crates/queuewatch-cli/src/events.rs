//! Listener that forwards watchdog detections to the printing thread

use queuewatch::{BlockedReport, WatchdogListener};
use serde::Serialize;
use std::sync::mpsc;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WatchdogEvent {
    Blocked { queue: String, report: BlockedReport },
    TaskOverdue { task: String },
    ProbeFailed { probe: String, message: String },
}

#[derive(Debug)]
pub struct ChannelListener {
    tx: mpsc::Sender<WatchdogEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::Receiver<WatchdogEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: WatchdogEvent) {
        // The receiver is gone once the run is over.
        if self.tx.send(event).is_err() {
            tracing::trace!("Dropping watchdog event after shutdown");
        }
    }
}

impl WatchdogListener for ChannelListener {
    fn on_blocked(&self, queue_name: &str, report: &BlockedReport) {
        self.forward(WatchdogEvent::Blocked {
            queue: queue_name.to_string(),
            report: report.clone(),
        });
    }

    fn on_task_overdue(&self, description: &str) {
        self.forward(WatchdogEvent::TaskOverdue {
            task: description.to_string(),
        });
    }

    fn on_probe_failed(&self, probe_name: &str, message: &str) {
        self.forward(WatchdogEvent::ProbeFailed {
            probe: probe_name.to_string(),
            message: message.to_string(),
        });
    }
}
