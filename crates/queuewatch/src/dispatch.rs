//! Per-task timing from a queue's dispatch log.
//!
//! Tasks on one queue run strictly one after another, so begin and finish
//! events are paired purely by order. A finish whose begin was never seen
//! (the hook was attached mid-task) counts as zero elapsed time.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::listener::WatchdogListener;
use crate::queue::{DispatchEvent, DispatchSink};
use crate::stats::Counters;

/// Receives every dispatch log line of the main queue.
pub type DispatchPrinter = Arc<dyn Fn(&str) + Send + Sync>;

/// A task that ran for at least the queue timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverdueTask {
    /// Label recorded from the begin event.
    pub description: String,
    /// How long the task ran.
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct DispatchRecord {
    started: Option<Instant>,
    task: Option<String>,
}

/// Pairs begin/finish events of one queue and flags slow tasks.
#[derive(Debug)]
pub struct DispatchTimer {
    timeout: Duration,
    record: Mutex<DispatchRecord>,
}

impl DispatchTimer {
    /// Flag tasks running for `timeout` or longer.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            record: Mutex::new(DispatchRecord::default()),
        }
    }

    /// The overrun threshold.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Feed one event observed at `now`.
    ///
    /// Returns the finished task if it overran.
    pub fn observe_at(&self, event: &DispatchEvent, now: Instant) -> Option<OverdueTask> {
        let mut record = self.record.lock();
        match event {
            DispatchEvent::Begin { task } => {
                record.started = Some(now);
                record.task = Some(task.clone());
                None
            }
            DispatchEvent::Finish { task } => {
                let started = record.started.take();
                let description = record.task.take().unwrap_or_else(|| task.clone());
                let elapsed =
                    started.map_or(Duration::ZERO, |started| now.saturating_duration_since(started));
                (started.is_some() && elapsed >= self.timeout).then_some(OverdueTask {
                    description,
                    elapsed,
                })
            }
        }
    }

    /// Feed one event observed now.
    pub fn observe(&self, event: &DispatchEvent) -> Option<OverdueTask> {
        self.observe_at(event, Instant::now())
    }
}

/// Build the sink installed on a monitored queue.
pub(crate) fn timing_sink(
    queue_name: String,
    timer: DispatchTimer,
    listener: Arc<dyn WatchdogListener>,
    counters: Arc<Counters>,
    printer: Option<DispatchPrinter>,
    verbose: bool,
) -> DispatchSink {
    Arc::new(move |event: &DispatchEvent| {
        verbose!(verbose, trace, queue = %queue_name, "{event}");
        if let Some(overdue) = timer.observe(event) {
            counters.record_overdue_task();
            verbose!(
                verbose,
                warn,
                queue = %queue_name,
                elapsed_ms = %overdue.elapsed.as_millis(),
                "Found overdue task: {}",
                overdue.description
            );
            listener.on_task_overdue(&overdue.description);
        }
        if let Some(printer) = &printer {
            printer(&event.to_string());
        }
    })
}
