//! Per-queue ping bookkeeping.
//!
//! All mutable checker fields are guarded by the watchdog lock. The ping
//! itself runs on the monitored queue's thread and only touches the
//! checker through that lock.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use crate::probe::{Probe, same_probe};
use crate::queue::{DispatchSink, MonitoredQueue, Task, TaskId};
use crate::watchdog::Shared;
use crate::worker::panic_message;

/// Identifies a checker for the lifetime of one watchdog.
pub(crate) type CheckerId = u64;

pub(crate) struct QueueChecker {
    id: CheckerId,
    queue: Arc<dyn MonitoredQueue>,
    name: String,
    timeout: Duration,
    post_at_front: bool,
    probes: Vec<Arc<dyn Probe>>,
    completed: bool,
    current_probe: Option<Arc<dyn Probe>>,
    started_at: Instant,
    pending: Option<TaskId>,
    hooked: bool,
}

/// What the watchdog thread needs to report one overdue checker.
pub(crate) struct OverdueChecker {
    pub(crate) name: String,
    pub(crate) queue: Arc<dyn MonitoredQueue>,
    pub(crate) description: String,
    pub(crate) blocked_probe: Option<String>,
    pub(crate) waiting_for: Duration,
}

impl QueueChecker {
    pub(crate) fn new(
        id: CheckerId,
        queue: Arc<dyn MonitoredQueue>,
        name: String,
        timeout: Duration,
        post_at_front: bool,
    ) -> Self {
        Self {
            id,
            queue,
            name,
            timeout,
            post_at_front,
            probes: Vec::new(),
            completed: true,
            current_probe: None,
            started_at: Instant::now(),
            pending: None,
            hooked: false,
        }
    }

    pub(crate) fn id(&self) -> CheckerId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn is_queue<Q: ?Sized>(&self, queue: &Arc<Q>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.queue), Arc::as_ptr(queue))
    }

    pub(crate) fn probe_count(&self) -> usize {
        self.probes.len()
    }

    /// Install the dispatch timing hook. Returns `false` if the queue has no dispatch log.
    pub(crate) fn attach_dispatch_hook(&mut self, sink: DispatchSink, verbose: bool) -> bool {
        match self.queue.set_dispatch_logging(Some(sink)) {
            Ok(()) => self.hooked = true,
            Err(err) => {
                verbose!(verbose, debug, queue = %self.name, "Dispatch hook not installed: {err}");
            }
        }
        self.hooked
    }

    /// Add a probe unless it is already registered.
    pub(crate) fn add_probe(&mut self, probe: Arc<dyn Probe>) -> bool {
        if self.probes.iter().any(|p| same_probe(p, &probe)) {
            return false;
        }
        self.probes.push(probe);
        true
    }

    pub(crate) fn remove_probe<P: ?Sized>(&mut self, probe: &Arc<P>) -> bool {
        let before = self.probes.len();
        self.probes
            .retain(|p| !std::ptr::addr_eq(Arc::as_ptr(p), Arc::as_ptr(probe)));
        self.probes.len() != before
    }

    /// Start a new round for this queue.
    ///
    /// Must be called with the watchdog lock held.
    pub(crate) fn schedule_check(&mut self, shared: &Arc<Shared>) {
        let verbose = shared.config.verbose_logging;

        if self.probes.is_empty() && self.queue_is_idle(verbose) {
            verbose!(verbose, debug, queue = %self.name, "Queue is idle, no ping needed");
            self.completed = true;
            return;
        }

        if !self.completed {
            verbose!(verbose, debug, queue = %self.name, "Previous ping still outstanding");
            return;
        }

        self.completed = false;
        self.current_probe = None;
        self.started_at = Instant::now();

        let task = ping_task(Arc::downgrade(shared), self.id, self.probes.clone());
        let label = format!("watchdog ping: {}", self.name);
        let posted = if self.post_at_front {
            self.queue.post_urgent(&label, task)
        } else {
            self.queue.post(&label, task)
        };

        match posted {
            Ok(id) => {
                self.pending = Some(id);
                verbose!(verbose, debug, queue = %self.name, "Ping scheduled");
            }
            Err(err) => {
                self.pending = None;
                verbose!(verbose, warn, queue = %self.name, "Failed to post ping: {err}");
            }
        }
    }

    /// Unknown idleness counts as busy.
    fn queue_is_idle(&self, verbose: bool) -> bool {
        match self.queue.is_idle() {
            Ok(idle) => idle,
            Err(err) => {
                verbose!(verbose, trace, queue = %self.name, "Idle state unavailable: {err}");
                false
            }
        }
    }

    pub(crate) fn is_overdue_at(&self, now: Instant) -> bool {
        !self.completed && now.saturating_duration_since(self.started_at) > self.timeout
    }

    pub(crate) fn describe_blocked_state(&self) -> String {
        match &self.current_probe {
            None => format!("Blocked in handler on {} ({})", self.name, self.queue.name()),
            Some(probe) => format!(
                "Blocked in probe {} on {} ({})",
                probe.name(),
                self.name,
                self.queue.name()
            ),
        }
    }

    pub(crate) fn overdue_at(&self, now: Instant) -> Option<OverdueChecker> {
        self.is_overdue_at(now).then(|| OverdueChecker {
            name: self.name.clone(),
            queue: Arc::clone(&self.queue),
            description: self.describe_blocked_state(),
            blocked_probe: self.current_probe.as_ref().map(|p| p.name().to_string()),
            waiting_for: now.saturating_duration_since(self.started_at),
        })
    }

    pub(crate) fn set_current_probe(&mut self, probe: Option<Arc<dyn Probe>>) {
        self.current_probe = probe;
    }

    pub(crate) fn mark_completed(&mut self) -> Duration {
        self.completed = true;
        self.current_probe = None;
        self.pending = None;
        self.started_at.elapsed()
    }

    /// Cancel the outstanding ping, detach the dispatch hook and drop the probes.
    pub(crate) fn release(&mut self, verbose: bool) {
        if !self.completed {
            if let Some(id) = self.pending.take() {
                let cancelled = self.queue.cancel(id);
                verbose!(verbose, debug, queue = %self.name, cancelled, "Unscheduled ping");
            }
        }
        if self.hooked {
            if let Err(err) = self.queue.set_dispatch_logging(None) {
                verbose!(verbose, debug, queue = %self.name, "Dispatch hook not detached: {err}");
            }
            self.hooked = false;
        }
        self.probes.clear();
        self.current_probe = None;
    }
}

fn ping_task(shared: Weak<Shared>, id: CheckerId, probes: Vec<Arc<dyn Probe>>) -> Task {
    Box::new(move || {
        if let Some(shared) = shared.upgrade() {
            run_ping(&shared, id, &probes);
        }
    })
}

/// Body of a ping, on the monitored queue's thread.
fn run_ping(shared: &Shared, id: CheckerId, probes: &[Arc<dyn Probe>]) {
    let verbose = shared.config.verbose_logging;

    for probe in probes {
        {
            let mut state = shared.state.lock();
            match state.checker_mut(id) {
                Some(checker) => checker.set_current_probe(Some(Arc::clone(probe))),
                // Removed while this ping was in flight.
                None => return,
            }
        }

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| probe.probe())) {
            let message = panic_message(payload.as_ref());
            tracing::error!(probe = probe.name(), panic = %message, "Probe panicked");
            shared.counters.record_probe_failure();
            shared.listener.on_probe_failed(probe.name(), &message);
        }
    }

    let mut state = shared.state.lock();
    if let Some(checker) = state.checker_mut(id) {
        let waited = checker.mark_completed();
        verbose!(
            verbose,
            debug,
            queue = %checker.name(),
            waited_ms = %waited.as_millis(),
            "Ping completed"
        );
    }
    shared.round_cond.notify_all();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueueError;
    use crate::queue::ThreadSnapshot;
    use parking_lot::Mutex;

    /// Queue that records posts and never runs anything.
    #[derive(Default)]
    struct Parked {
        posted: Mutex<Vec<(String, bool)>>,
        cancelled: Mutex<Vec<TaskId>>,
        idle: Option<bool>,
    }

    impl MonitoredQueue for Parked {
        fn name(&self) -> &str {
            "parked"
        }

        fn post(&self, label: &str, _task: Task) -> Result<TaskId, QueueError> {
            let mut posted = self.posted.lock();
            posted.push((label.to_string(), false));
            Ok(TaskId::new(posted.len() as u64))
        }

        fn post_urgent(&self, label: &str, _task: Task) -> Result<TaskId, QueueError> {
            let mut posted = self.posted.lock();
            posted.push((label.to_string(), true));
            Ok(TaskId::new(posted.len() as u64))
        }

        fn cancel(&self, id: TaskId) -> bool {
            self.cancelled.lock().push(id);
            true
        }

        fn is_idle(&self) -> Result<bool, QueueError> {
            self.idle.ok_or(QueueError::Unsupported("is_idle"))
        }

        fn thread_snapshot(&self) -> ThreadSnapshot {
            ThreadSnapshot::default()
        }
    }

    fn checker_for(queue: &Arc<Parked>, timeout: Duration, front: bool) -> QueueChecker {
        let queue: Arc<dyn MonitoredQueue> = queue.clone();
        QueueChecker::new(1, queue, "parked".to_string(), timeout, front)
    }

    fn shared() -> Arc<Shared> {
        Arc::new(Shared::new(
            crate::WatchdogConfig::default(),
            Arc::new(crate::LoggingListener),
        ))
    }

    #[test]
    fn test_new_checker_is_complete_and_not_overdue() {
        let queue = Arc::new(Parked::default());
        let checker = checker_for(&queue, Duration::from_millis(10), false);
        assert!(checker.is_completed());
        assert!(!checker.is_overdue_at(Instant::now() + Duration::from_secs(1)));
    }

    #[test]
    fn test_schedule_posts_once_while_outstanding() {
        let queue = Arc::new(Parked::default());
        let shared = shared();
        let mut checker = checker_for(&queue, Duration::from_millis(10), true);

        checker.schedule_check(&shared);
        checker.schedule_check(&shared);

        let posted = queue.posted.lock().clone();
        assert_eq!(posted, vec![("watchdog ping: parked".to_string(), true)]);
        assert!(!checker.is_completed());
    }

    #[test]
    fn test_overdue_predicate() {
        let queue = Arc::new(Parked::default());
        let shared = shared();
        let mut checker = checker_for(&queue, Duration::from_millis(100), false);

        checker.schedule_check(&shared);
        let start = checker.started_at;
        assert!(!checker.is_overdue_at(start + Duration::from_millis(100)));
        assert!(checker.is_overdue_at(start + Duration::from_millis(101)));

        checker.mark_completed();
        assert!(!checker.is_overdue_at(start + Duration::from_secs(10)));
    }

    #[test]
    fn test_idle_queue_without_probes_skips_ping() {
        let queue = Arc::new(Parked {
            idle: Some(true),
            ..Default::default()
        });
        let shared = shared();
        let mut checker = checker_for(&queue, Duration::from_millis(10), false);

        checker.schedule_check(&shared);
        assert!(queue.posted.lock().is_empty());
        assert!(checker.is_completed());

        // Probes always need a real ping, idle or not.
        checker.add_probe(crate::probe_fn("p", || {}));
        checker.schedule_check(&shared);
        assert_eq!(queue.posted.lock().len(), 1);
    }

    #[test]
    fn test_describe_blocked_state() {
        let queue = Arc::new(Parked::default());
        let mut checker = checker_for(&queue, Duration::from_millis(10), false);
        assert_eq!(
            checker.describe_blocked_state(),
            "Blocked in handler on parked (parked)"
        );

        checker.set_current_probe(Some(crate::probe_fn("db-lock", || {})));
        assert_eq!(
            checker.describe_blocked_state(),
            "Blocked in probe db-lock on parked (parked)"
        );
    }

    #[test]
    fn test_release_cancels_outstanding_ping() {
        let queue = Arc::new(Parked::default());
        let shared = shared();
        let mut checker = checker_for(&queue, Duration::from_millis(10), false);
        checker.add_probe(crate::probe_fn("p", || {}));

        checker.schedule_check(&shared);
        checker.release(false);

        assert_eq!(*queue.cancelled.lock(), vec![TaskId::new(1)]);
        assert_eq!(checker.probe_count(), 0);
    }

    #[test]
    fn test_probe_deduplication() {
        let queue = Arc::new(Parked::default());
        let mut checker = checker_for(&queue, Duration::from_millis(10), false);
        let probe = crate::probe_fn("p", || {});

        assert!(checker.add_probe(Arc::clone(&probe)));
        assert!(!checker.add_probe(Arc::clone(&probe)));
        assert_eq!(checker.probe_count(), 1);
        assert!(checker.remove_probe(&probe));
        assert!(!checker.remove_probe(&probe));
    }
}
