//! A sequential task queue on a dedicated thread.
//!
//! `WorkerQueue` is the executor the watchdog uses for its own probe
//! queue, and a ready-made [`MonitoredQueue`] for applications that do not
//! bring their own.

use parking_lot::{Condvar, Mutex, RwLock};
use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Instant;

use crate::error::{QueueError, WatchdogError, WatchdogResult};
use crate::queue::{DispatchEvent, DispatchSink, MonitoredQueue, Task, TaskId, ThreadSnapshot};

struct Pending {
    id: TaskId,
    label: String,
    task: Task,
    posted_from: Arc<Backtrace>,
}

struct Running {
    label: String,
    started: Instant,
    posted_from: Arc<Backtrace>,
}

#[derive(Default)]
struct WorkerState {
    pending: VecDeque<Pending>,
    running: Option<Running>,
    quitting: bool,
    next_id: u64,
}

struct WorkerShared {
    name: String,
    state: Mutex<WorkerState>,
    available: Condvar,
    dispatch: RwLock<Option<DispatchSink>>,
}

impl WorkerShared {
    fn emit(&self, event: &DispatchEvent) {
        let sink = self.dispatch.read().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }
}

/// Single-threaded FIFO executor with urgent posting and a dispatch log.
///
/// Dropping the queue quits it without waiting for the running task.
pub struct WorkerQueue {
    shared: Arc<WorkerShared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerQueue {
    /// Spawn a queue on a new thread called `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS refuses to create the thread.
    pub fn spawn(name: impl Into<String>) -> WatchdogResult<Self> {
        let name = name.into();
        let shared = Arc::new(WorkerShared {
            name: name.clone(),
            state: Mutex::new(WorkerState::default()),
            available: Condvar::new(),
            dispatch: RwLock::new(None),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_main(&thread_shared))
            .map_err(|e| WatchdogError::thread_spawn(name, &e))?;

        Ok(Self {
            shared,
            thread_id: handle.thread().id(),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Id of the worker thread.
    #[must_use]
    pub fn thread_id(&self) -> ThreadId {
        self.thread_id
    }

    /// Number of tasks waiting to run.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Whether [`quit`](Self::quit) has been called.
    #[must_use]
    pub fn is_quitting(&self) -> bool {
        self.shared.state.lock().quitting
    }

    /// Stop accepting tasks and discard the pending ones.
    ///
    /// The running task, if any, is not interrupted.
    pub fn quit(&self) {
        let discarded = {
            let mut state = self.shared.state.lock();
            state.quitting = true;
            std::mem::take(&mut state.pending)
        };
        self.shared.available.notify_all();
        drop(discarded);
    }

    /// Wait for the worker thread to exit. Returns `false` if it panicked.
    ///
    /// Blocks for as long as the running task does; call [`quit`](Self::quit) first.
    pub fn join(&self) -> bool {
        let handle = self.handle.lock().take();
        handle.map_or(true, |handle| handle.join().is_ok())
    }

    fn enqueue(&self, label: &str, task: Task, urgent: bool) -> Result<TaskId, QueueError> {
        let posted_from = Arc::new(Backtrace::capture());
        let id = {
            let mut state = self.shared.state.lock();
            if state.quitting {
                return Err(QueueError::Closed(self.shared.name.clone()));
            }
            state.next_id = state.next_id.wrapping_add(1);
            let id = TaskId::new(state.next_id);
            let pending = Pending {
                id,
                label: label.to_string(),
                task,
                posted_from,
            };
            if urgent {
                state.pending.push_front(pending);
            } else {
                state.pending.push_back(pending);
            }
            id
        };
        self.shared.available.notify_one();
        Ok(id)
    }
}

impl MonitoredQueue for WorkerQueue {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn post(&self, label: &str, task: Task) -> Result<TaskId, QueueError> {
        self.enqueue(label, task, false)
    }

    fn post_urgent(&self, label: &str, task: Task) -> Result<TaskId, QueueError> {
        self.enqueue(label, task, true)
    }

    fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock();
            state
                .pending
                .iter()
                .position(|pending| pending.id == id)
                .and_then(|index| state.pending.remove(index))
        };
        removed.is_some()
    }

    fn is_idle(&self) -> Result<bool, QueueError> {
        let state = self.shared.state.lock();
        if state.quitting {
            return Err(QueueError::Closed(self.shared.name.clone()));
        }
        Ok(state.pending.is_empty() && state.running.is_none())
    }

    fn set_dispatch_logging(&self, sink: Option<DispatchSink>) -> Result<(), QueueError> {
        *self.shared.dispatch.write() = sink;
        Ok(())
    }

    fn thread_snapshot(&self) -> ThreadSnapshot {
        let state = self.shared.state.lock();
        let running = state.running.as_ref();
        ThreadSnapshot {
            thread_name: self.shared.name.clone(),
            thread_id: Some(format!("{:?}", self.thread_id)),
            current_task: running.map(|running| running.label.clone()),
            running_for: running.map(|running| running.started.elapsed()),
            stack: running
                .filter(|running| running.posted_from.status() == BacktraceStatus::Captured)
                .map(|running| format!("task posted from:\n{}", running.posted_from)),
        }
    }
}

impl Drop for WorkerQueue {
    fn drop(&mut self) {
        self.quit();
    }
}

impl std::fmt::Debug for WorkerQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerQueue")
            .field("name", &self.shared.name)
            .field("pending", &state.pending.len())
            .field("running", &state.running.as_ref().map(|r| r.label.as_str()))
            .field("quitting", &state.quitting)
            .finish()
    }
}

fn worker_main(shared: &WorkerShared) {
    loop {
        let (label, task) = {
            let mut state = shared.state.lock();
            let next = loop {
                if state.quitting {
                    return;
                }
                if let Some(next) = state.pending.pop_front() {
                    break next;
                }
                shared.available.wait(&mut state);
            };
            state.running = Some(Running {
                label: next.label.clone(),
                started: Instant::now(),
                posted_from: next.posted_from,
            });
            (next.label, next.task)
        };

        shared.emit(&DispatchEvent::Begin {
            task: label.clone(),
        });
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
            tracing::error!(
                queue = %shared.name,
                task = %label,
                panic = %panic_message(payload.as_ref()),
                "Task panicked; worker continues with the next task"
            );
        }
        shared.emit(&DispatchEvent::Finish { task: label });

        shared.state.lock().running = None;
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
