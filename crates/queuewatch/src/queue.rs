//! The task-queue capability consumed by the watchdog.
//!
//! The watchdog does not run tasks itself. Anything that executes posted
//! closures one at a time on a single thread can be monitored by
//! implementing [`MonitoredQueue`]. [`WorkerQueue`](crate::worker::WorkerQueue)
//! is the implementation shipped with this crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::QueueError;

/// A unit of work posted to a queue.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Receives the begin/finish events of every task a queue dispatches.
pub type DispatchSink = Arc<dyn Fn(&DispatchEvent) + Send + Sync>;

/// Handle of a posted task, used to cancel it before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(u64);

impl TaskId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// One line of a queue's dispatch log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// The queue is about to run `task`.
    Begin {
        /// Label of the task.
        task: String,
    },
    /// The queue finished running `task`.
    Finish {
        /// Label of the task.
        task: String,
    },
}

impl DispatchEvent {
    /// Label of the task this event belongs to.
    #[must_use]
    pub fn task(&self) -> &str {
        match self {
            Self::Begin { task } | Self::Finish { task } => task,
        }
    }

    /// Whether this is a begin event.
    #[must_use]
    pub fn is_begin(&self) -> bool {
        matches!(self, Self::Begin { .. })
    }
}

impl fmt::Display for DispatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Begin { task } => write!(f, ">>>>> Dispatching to {task}"),
            Self::Finish { task } => write!(f, "<<<<< Finished to {task}"),
        }
    }
}

/// What a queue can tell about the thread behind it.
///
/// Capturing the live call stack of another thread is platform dependent,
/// so every field past the name is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadSnapshot {
    /// Name of the thread running the queue.
    pub thread_name: String,
    /// Debug rendering of the thread id.
    pub thread_id: Option<String>,
    /// Label of the task the thread is running, if any.
    pub current_task: Option<String>,
    /// How long the current task has been running.
    pub running_for: Option<Duration>,
    /// Captured stack trace text.
    pub stack: Option<String>,
}

impl fmt::Display for ThreadSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thread '{}'", self.thread_name)?;
        if let Some(id) = &self.thread_id {
            write!(f, " [{id}]")?;
        }
        if let Some(task) = &self.current_task {
            write!(f, " running '{task}'")?;
            if let Some(running_for) = self.running_for {
                write!(f, " for {}ms", running_for.as_millis())?;
            }
        }
        if let Some(stack) = &self.stack {
            write!(f, "\n{stack}")?;
        }
        Ok(())
    }
}

/// A strictly sequential task executor running on its own thread.
///
/// Implementations must never run a posted task inline inside `post`:
/// watchdog pings take the watchdog lock, which the caller of `post`
/// already holds.
pub trait MonitoredQueue: Send + Sync {
    /// Name of the queue's thread.
    fn name(&self) -> &str;

    /// Append a task to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue has quit.
    fn post(&self, label: &str, task: Task) -> Result<TaskId, QueueError>;

    /// Put a task at the front of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue has quit.
    fn post_urgent(&self, label: &str, task: Task) -> Result<TaskId, QueueError>;

    /// Remove a task that has not started yet. Returns `true` if it was removed.
    fn cancel(&self, id: TaskId) -> bool;

    /// Whether the queue is waiting for work with nothing pending.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unsupported`] when the queue cannot tell, or
    /// [`QueueError::Closed`] once it has quit.
    fn is_idle(&self) -> Result<bool, QueueError> {
        Err(QueueError::Unsupported("is_idle"))
    }

    /// Replace the dispatch log sink. `None` detaches it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Unsupported`] when the queue has no dispatch log.
    fn set_dispatch_logging(&self, sink: Option<DispatchSink>) -> Result<(), QueueError> {
        drop(sink);
        Err(QueueError::Unsupported("dispatch_logging"))
    }

    /// Describe the queue's thread for a blocked report.
    fn thread_snapshot(&self) -> ThreadSnapshot;
}

/// Identity comparison of two queue handles.
pub(crate) fn same_queue(a: &Arc<dyn MonitoredQueue>, b: &Arc<dyn MonitoredQueue>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Inert;

    impl MonitoredQueue for Inert {
        fn name(&self) -> &str {
            "inert"
        }

        fn post(&self, _label: &str, _task: Task) -> Result<TaskId, QueueError> {
            Err(QueueError::Closed(self.name().to_string()))
        }

        fn post_urgent(&self, label: &str, task: Task) -> Result<TaskId, QueueError> {
            self.post(label, task)
        }

        fn cancel(&self, _id: TaskId) -> bool {
            false
        }

        fn thread_snapshot(&self) -> ThreadSnapshot {
            ThreadSnapshot {
                thread_name: self.name().to_string(),
                ..Default::default()
            }
        }
    }

    #[test]
    fn test_dispatch_event_lines() {
        let begin = DispatchEvent::Begin {
            task: "render".to_string(),
        };
        let finish = DispatchEvent::Finish {
            task: "render".to_string(),
        };
        assert_eq!(begin.to_string(), ">>>>> Dispatching to render");
        assert_eq!(finish.to_string(), "<<<<< Finished to render");
        assert!(begin.is_begin());
        assert!(!finish.is_begin());
        assert_eq!(finish.task(), "render");
    }

    #[test]
    fn test_optional_capabilities_default_to_unsupported() {
        let queue = Inert;
        assert_eq!(queue.is_idle(), Err(QueueError::Unsupported("is_idle")));
        assert!(queue.set_dispatch_logging(None).is_err());
    }

    #[test]
    fn test_same_queue_is_pointer_identity() {
        let a: Arc<dyn MonitoredQueue> = Arc::new(Inert);
        let b: Arc<dyn MonitoredQueue> = Arc::new(Inert);
        assert!(same_queue(&a, &Arc::clone(&a)));
        assert!(!same_queue(&a, &b));
    }

    #[test]
    fn test_snapshot_display() {
        let snapshot = ThreadSnapshot {
            thread_name: "io".to_string(),
            thread_id: Some("ThreadId(7)".to_string()),
            current_task: Some("flush".to_string()),
            running_for: Some(Duration::from_millis(1500)),
            stack: None,
        };
        assert_eq!(
            snapshot.to_string(),
            "thread 'io' [ThreadId(7)] running 'flush' for 1500ms"
        );
    }
}
