//! The watchdog controller and its round loop.
//!
//! One background thread pings every registered queue once per
//! `check_interval`, waits for the interval to elapse and reports every
//! queue whose ping is still outstanding past its timeout.

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::checker::{CheckerId, OverdueChecker, QueueChecker};
use crate::config::WatchdogConfig;
use crate::dispatch::{DispatchPrinter, DispatchTimer, timing_sink};
use crate::error::{WatchdogError, WatchdogResult};
use crate::listener::{BlockedReport, WatchdogListener};
use crate::probe::Probe;
use crate::queue::{MonitoredQueue, same_queue};
use crate::stats::{Counters, WatchdogStats};
use crate::worker::WorkerQueue;

const LOOP_THREAD_NAME: &str = "queuewatch";

/// Lifecycle of a [`Watchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WatchdogStatus {
    /// No round loop is running.
    #[default]
    Idle,
    /// The round loop is pinging queues.
    Running,
    /// Rounds are suspended; registrations are kept.
    Paused,
    /// Torn down for good.
    Released,
}

impl WatchdogStatus {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Released => "released",
        }
    }
}

impl fmt::Display for WatchdogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The application's primary queue, designated at construction.
pub struct MainQueue {
    queue: Arc<dyn MonitoredQueue>,
    printer: Option<DispatchPrinter>,
}

impl MainQueue {
    /// Designate `queue` as the primary queue.
    pub fn new(queue: Arc<dyn MonitoredQueue>) -> Self {
        Self {
            queue,
            printer: None,
        }
    }

    /// Also forward every dispatch log line of the queue to `printer`.
    #[must_use]
    pub fn with_printer(mut self, printer: DispatchPrinter) -> Self {
        self.printer = Some(printer);
        self
    }
}

impl fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MainQueue")
            .field("queue", &self.queue.name())
            .field("printer", &self.printer.is_some())
            .finish()
    }
}

struct ProbeQueue {
    worker: Arc<WorkerQueue>,
    checker_id: CheckerId,
}

pub(crate) struct WatchdogState {
    status: WatchdogStatus,
    generation: u64,
    checkers: Vec<QueueChecker>,
    next_checker_id: CheckerId,
    main_queue: Option<Arc<dyn MonitoredQueue>>,
    probe_queue: Option<ProbeQueue>,
}

impl WatchdogState {
    fn new() -> Self {
        Self {
            status: WatchdogStatus::Idle,
            generation: 0,
            checkers: Vec::new(),
            next_checker_id: 0,
            main_queue: None,
            probe_queue: None,
        }
    }

    pub(crate) fn checker_mut(&mut self, id: CheckerId) -> Option<&mut QueueChecker> {
        self.checkers.iter_mut().find(|checker| checker.id() == id)
    }

    /// Whether the loop started for `generation` should keep going.
    fn is_current(&self, generation: u64) -> bool {
        self.status == WatchdogStatus::Running && self.generation == generation
    }

    fn ensure_not_released(&self) -> WatchdogResult<()> {
        if self.status == WatchdogStatus::Released {
            return Err(WatchdogError::Released);
        }
        Ok(())
    }

    /// Invalidate the running loop, if any.
    fn bump_generation(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

/// State shared between the controller handle, its loop thread and pings.
pub(crate) struct Shared {
    pub(crate) config: WatchdogConfig,
    pub(crate) listener: Arc<dyn WatchdogListener>,
    pub(crate) counters: Arc<Counters>,
    pub(crate) state: Mutex<WatchdogState>,
    pub(crate) round_cond: Condvar,
}

impl Shared {
    pub(crate) fn new(config: WatchdogConfig, listener: Arc<dyn WatchdogListener>) -> Self {
        Self {
            config,
            listener,
            counters: Arc::new(Counters::default()),
            state: Mutex::new(WatchdogState::new()),
            round_cond: Condvar::new(),
        }
    }
}

/// Detects hung task queues and deadlocked locks.
///
/// Dropping the watchdog releases it.
pub struct Watchdog {
    shared: Arc<Shared>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Watchdog {
    /// Create an idle watchdog.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::InvalidConfiguration`] if `config` is invalid.
    pub fn new(config: WatchdogConfig, listener: Arc<dyn WatchdogListener>) -> WatchdogResult<Self> {
        config.validate()?;
        tracing::info!(
            interval_ms = %config.check_interval.as_millis(),
            dispatch_logging = config.dispatch_logging,
            "Watchdog created"
        );
        Ok(Self {
            shared: Arc::new(Shared::new(config, listener)),
            loop_handle: Mutex::new(None),
        })
    }

    /// Create a watchdog with a designated primary queue.
    ///
    /// The primary queue is registered with `main_queue_timeout` unless
    /// `register_main_queue` is off. Either way it can never be added again
    /// through [`add_queue`](Self::add_queue).
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the round loop cannot start.
    pub fn with_main_queue(
        config: WatchdogConfig,
        listener: Arc<dyn WatchdogListener>,
        main: MainQueue,
    ) -> WatchdogResult<Self> {
        let watchdog = Self::new(config, listener)?;
        {
            let mut state = watchdog.shared.state.lock();
            state.main_queue = Some(Arc::clone(&main.queue));
            let config = &watchdog.shared.config;
            if config.register_main_queue {
                watchdog.register_locked(
                    &mut state,
                    main.queue,
                    config.main_queue_name.clone(),
                    config.main_queue_timeout,
                    config.post_at_front_of_queue,
                    main.printer,
                )?;
            }
        }
        Ok(watchdog)
    }

    /// Monitor `queue` with the round interval as timeout and urgent pings.
    ///
    /// # Errors
    ///
    /// See [`add_queue_with`](Self::add_queue_with).
    pub fn add_queue(&self, queue: Arc<dyn MonitoredQueue>) -> WatchdogResult<()> {
        let timeout = self.shared.config.check_interval;
        self.add_queue_with(queue, timeout, true)
    }

    /// Monitor `queue`, reporting it when a ping is outstanding longer than `timeout`.
    ///
    /// Starts the round loop if the watchdog is idle.
    ///
    /// # Errors
    ///
    /// - [`WatchdogError::InvalidConfiguration`] for a zero timeout
    /// - [`WatchdogError::MainQueueRegistration`] for the primary queue
    /// - [`WatchdogError::AlreadyRegistered`] if `queue` is already monitored
    /// - [`WatchdogError::Released`] after [`release`](Self::release)
    pub fn add_queue_with(
        &self,
        queue: Arc<dyn MonitoredQueue>,
        timeout: Duration,
        post_at_front: bool,
    ) -> WatchdogResult<()> {
        let name = queue.name().to_string();
        if timeout.is_zero() {
            return Err(WatchdogError::invalid_configuration(format!(
                "timeout of queue '{name}' must be greater than 0"
            )));
        }

        let mut state = self.shared.state.lock();
        state.ensure_not_released()?;
        if state
            .main_queue
            .as_ref()
            .is_some_and(|main| same_queue(main, &queue))
        {
            return Err(WatchdogError::main_queue_registration(name));
        }
        self.register_locked(&mut state, queue, name, timeout, post_at_front, None)?;
        Ok(())
    }

    /// Stop monitoring `queue`. Returns `false` if it was not monitored.
    ///
    /// A pending ping is cancelled; a ping already running finishes unobserved.
    pub fn remove_queue<Q>(&self, queue: &Arc<Q>) -> bool
    where
        Q: MonitoredQueue + ?Sized,
    {
        let verbose = self.shared.config.verbose_logging;
        let mut state = self.shared.state.lock();
        let Some(index) = state.checkers.iter().position(|c| c.is_queue(queue)) else {
            return false;
        };

        let mut checker = state.checkers.remove(index);
        checker.release(verbose);
        if state
            .probe_queue
            .as_ref()
            .is_some_and(|probes| probes.checker_id == checker.id())
        {
            state.probe_queue = None;
        }
        verbose!(verbose, info, queue = %checker.name(), "Queue removed");

        if state.checkers.is_empty() && state.status == WatchdogStatus::Running {
            state.status = WatchdogStatus::Idle;
            state.bump_generation();
            tracing::debug!("Last queue removed, watchdog idle");
        }
        self.shared.round_cond.notify_all();
        true
    }

    /// Run `probe` on the probe queue every round.
    ///
    /// The probe queue thread is spawned on first use. Registering the same
    /// probe twice has no effect.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Released`] after release, or
    /// [`WatchdogError::ThreadSpawn`] if the probe thread cannot start.
    pub fn add_probe(&self, probe: Arc<dyn Probe>) -> WatchdogResult<()> {
        let verbose = self.shared.config.verbose_logging;
        let mut state = self.shared.state.lock();
        state.ensure_not_released()?;

        let checker_id = match &state.probe_queue {
            Some(probes) => probes.checker_id,
            None => {
                let config = &self.shared.config;
                let worker = Arc::new(WorkerQueue::spawn(config.probe_queue_name.clone())?);
                let checker_id = self.register_locked(
                    &mut state,
                    Arc::clone(&worker) as Arc<dyn MonitoredQueue>,
                    config.probe_queue_name.clone(),
                    config.check_interval,
                    config.post_at_front_of_queue,
                    None,
                )?;
                state.probe_queue = Some(ProbeQueue { worker, checker_id });
                checker_id
            }
        };

        if let Some(checker) = state.checker_mut(checker_id) {
            let name = probe.name().to_string();
            if checker.add_probe(probe) {
                verbose!(verbose, info, probe = %name, "Probe added");
            } else {
                verbose!(verbose, debug, probe = %name, "Probe already registered");
            }
        }
        Ok(())
    }

    /// Stop running `probe`. Returns `false` if it was not registered.
    pub fn remove_probe<P>(&self, probe: &Arc<P>) -> bool
    where
        P: Probe + ?Sized,
    {
        let mut state = self.shared.state.lock();
        let Some(checker_id) = state.probe_queue.as_ref().map(|probes| probes.checker_id) else {
            return false;
        };
        state
            .checker_mut(checker_id)
            .is_some_and(|checker| checker.remove_probe(probe))
    }

    /// Start or resume the round loop. Does nothing if already running.
    ///
    /// # Errors
    ///
    /// Returns [`WatchdogError::Released`] after release, or
    /// [`WatchdogError::ThreadSpawn`] if the loop thread cannot start.
    pub fn start(&self) -> WatchdogResult<()> {
        let mut state = self.shared.state.lock();
        match state.status {
            WatchdogStatus::Released => Err(WatchdogError::Released),
            WatchdogStatus::Running => Ok(()),
            WatchdogStatus::Idle | WatchdogStatus::Paused => self.start_locked(&mut state),
        }
    }

    /// Suspend rounds, keeping every registration.
    ///
    /// A paused watchdog stays paused when queues are added.
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if matches!(state.status, WatchdogStatus::Running | WatchdogStatus::Idle) {
            state.status = WatchdogStatus::Paused;
            state.bump_generation();
            self.shared.round_cond.notify_all();
            tracing::info!("Watchdog paused");
        }
    }

    /// Stop the round loop, drop every checker and shut the probe queue down.
    ///
    /// Irreversible. Waits for the loop thread unless called from a listener.
    pub fn release(&self) {
        let verbose = self.shared.config.verbose_logging;
        let probe_queue = {
            let mut state = self.shared.state.lock();
            if state.status == WatchdogStatus::Released {
                return;
            }
            state.status = WatchdogStatus::Released;
            state.bump_generation();
            for checker in &mut state.checkers {
                checker.release(verbose);
            }
            state.checkers.clear();
            state.main_queue = None;
            self.shared.round_cond.notify_all();
            state.probe_queue.take()
        };

        // A deadlocked probe keeps the thread alive; it is not joined.
        if let Some(probes) = probe_queue {
            probes.worker.quit();
        }

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                tracing::error!("Watchdog loop thread panicked");
            }
        }
        tracing::info!("Watchdog released");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn status(&self) -> WatchdogStatus {
        self.shared.state.lock().status
    }

    /// Number of monitored queues, the probe queue included.
    #[must_use]
    pub fn queue_count(&self) -> usize {
        self.shared.state.lock().checkers.len()
    }

    /// Whether `queue` is monitored.
    #[must_use]
    pub fn is_monitored<Q>(&self, queue: &Arc<Q>) -> bool
    where
        Q: MonitoredQueue + ?Sized,
    {
        self.shared
            .state
            .lock()
            .checkers
            .iter()
            .any(|checker| checker.is_queue(queue))
    }

    /// Number of registered probes.
    #[must_use]
    pub fn probe_count(&self) -> usize {
        let mut state = self.shared.state.lock();
        let Some(checker_id) = state.probe_queue.as_ref().map(|probes| probes.checker_id) else {
            return 0;
        };
        state
            .checker_mut(checker_id)
            .map_or(0, |checker| checker.probe_count())
    }

    /// The configuration in effect.
    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.shared.config
    }

    /// Counters since creation.
    #[must_use]
    pub fn stats(&self) -> WatchdogStats {
        self.shared.counters.snapshot()
    }

    fn register_locked(
        &self,
        state: &mut WatchdogState,
        queue: Arc<dyn MonitoredQueue>,
        name: String,
        timeout: Duration,
        post_at_front: bool,
        printer: Option<DispatchPrinter>,
    ) -> WatchdogResult<CheckerId> {
        if state.checkers.iter().any(|checker| checker.is_queue(&queue)) {
            return Err(WatchdogError::already_registered(name));
        }
        if state.status == WatchdogStatus::Idle {
            self.start_locked(state)?;
        }

        let config = &self.shared.config;
        let id = state.next_checker_id;
        state.next_checker_id = id.wrapping_add(1);

        let mut checker = QueueChecker::new(id, Arc::clone(&queue), name.clone(), timeout, post_at_front);
        if config.dispatch_logging {
            let sink = timing_sink(
                name.clone(),
                DispatchTimer::new(timeout),
                Arc::clone(&self.shared.listener),
                Arc::clone(&self.shared.counters),
                printer,
                config.verbose_logging,
            );
            checker.attach_dispatch_hook(sink, config.verbose_logging);
        }
        state.checkers.push(checker);

        verbose!(
            config.verbose_logging,
            info,
            queue = %name,
            timeout_ms = %timeout.as_millis(),
            post_at_front,
            "Queue registered"
        );
        Ok(id)
    }

    fn start_locked(&self, state: &mut WatchdogState) -> WatchdogResult<()> {
        let generation = state.bump_generation();
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name(LOOP_THREAD_NAME.to_string())
            .spawn(move || run_rounds(&shared, generation))
            .map_err(|err| WatchdogError::thread_spawn(LOOP_THREAD_NAME, &err))?;
        state.status = WatchdogStatus::Running;

        // A loop from before a pause exits on its own once it sees the new generation.
        drop(self.loop_handle.lock().replace(handle));
        tracing::info!(generation, "Watchdog started");
        Ok(())
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Watchdog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Watchdog")
            .field("status", &state.status)
            .field("queues", &state.checkers.len())
            .field("config", &self.shared.config)
            .finish_non_exhaustive()
    }
}

fn run_rounds(shared: &Arc<Shared>, generation: u64) {
    let verbose = shared.config.verbose_logging;
    let interval = shared.config.check_interval;

    loop {
        let mut state = shared.state.lock();
        if !state.is_current(generation) {
            break;
        }
        for checker in &mut state.checkers {
            checker.schedule_check(shared);
        }

        let round_start = Instant::now();
        loop {
            let remaining = interval.saturating_sub(round_start.elapsed());
            if remaining.is_zero() {
                break;
            }
            let timed_out = shared.round_cond.wait_for(&mut state, remaining).timed_out();
            if !state.is_current(generation) {
                verbose!(verbose, debug, generation, "Round loop stopping");
                return;
            }
            if !timed_out {
                verbose!(
                    verbose,
                    trace,
                    remaining_ms = %interval.saturating_sub(round_start.elapsed()).as_millis(),
                    "Round wait woke early"
                );
            }
        }

        let clean = state.checkers.iter().all(QueueChecker::is_completed);
        let now = Instant::now();
        let overdue: Vec<OverdueChecker> = if clean {
            Vec::new()
        } else {
            state
                .checkers
                .iter()
                .filter_map(|checker| checker.overdue_at(now))
                .collect()
        };
        drop(state);

        shared.counters.record_round(clean);
        verbose!(verbose, debug, clean, overdue = overdue.len(), "Round finished");
        for checker in overdue {
            report_blocked(shared, checker);
        }
    }
}

fn report_blocked(shared: &Shared, checker: OverdueChecker) {
    let report = BlockedReport {
        thread: checker.queue.thread_snapshot(),
        queue_name: checker.name,
        description: checker.description,
        blocked_probe: checker.blocked_probe,
        waiting_for: checker.waiting_for,
    };
    shared.counters.record_blocked_report();
    shared.listener.on_blocked(&report.queue_name, &report);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::LoggingListener;
    use crate::probe::probe_fn;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn watchdog(interval_ms: u64) -> WatchdogResult<Watchdog> {
        let config = WatchdogConfig::builder()
            .check_interval(Duration::from_millis(interval_ms))
            .build()?;
        Watchdog::new(config, Arc::new(LoggingListener))
    }

    #[test]
    fn test_status_names() {
        assert_eq!(WatchdogStatus::Idle.to_string(), "idle");
        assert_eq!(WatchdogStatus::Running.as_str(), "running");
        assert_eq!(WatchdogStatus::default(), WatchdogStatus::Idle);
    }

    #[test]
    fn test_new_watchdog_is_idle() -> TestResult {
        let watchdog = watchdog(50)?;
        assert_eq!(watchdog.status(), WatchdogStatus::Idle);
        assert_eq!(watchdog.queue_count(), 0);
        assert_eq!(watchdog.probe_count(), 0);
        Ok(())
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = WatchdogConfig {
            check_interval: Duration::ZERO,
            ..Default::default()
        };
        let result = Watchdog::new(config, Arc::new(LoggingListener));
        assert!(matches!(result, Err(WatchdogError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_first_registration_starts_and_last_removal_idles() -> TestResult {
        let watchdog = watchdog(20)?;
        let queue = Arc::new(WorkerQueue::spawn("worker")?);

        watchdog.add_queue(queue.clone())?;
        assert_eq!(watchdog.status(), WatchdogStatus::Running);
        assert!(watchdog.is_monitored(&queue));

        assert!(watchdog.remove_queue(&queue));
        assert!(!watchdog.remove_queue(&queue));
        assert_eq!(watchdog.status(), WatchdogStatus::Idle);
        Ok(())
    }

    #[test]
    fn test_zero_timeout_rejected() -> TestResult {
        let watchdog = watchdog(20)?;
        let queue = Arc::new(WorkerQueue::spawn("worker")?);
        let result = watchdog.add_queue_with(queue, Duration::ZERO, false);
        assert!(matches!(result, Err(WatchdogError::InvalidConfiguration(_))));
        assert_eq!(watchdog.queue_count(), 0);
        Ok(())
    }

    #[test]
    fn test_probe_queue_created_lazily() -> TestResult {
        let watchdog = watchdog(20)?;
        let probe = probe_fn("noop", || {});

        watchdog.add_probe(Arc::clone(&probe))?;
        watchdog.add_probe(Arc::clone(&probe))?;
        assert_eq!(watchdog.probe_count(), 1);
        assert_eq!(watchdog.queue_count(), 1);

        assert!(watchdog.remove_probe(&probe));
        assert_eq!(watchdog.probe_count(), 0);
        Ok(())
    }

    #[test]
    fn test_release_is_terminal() -> TestResult {
        let watchdog = watchdog(20)?;
        let queue = Arc::new(WorkerQueue::spawn("worker")?);
        watchdog.add_queue(queue.clone())?;

        watchdog.release();
        watchdog.release();
        assert_eq!(watchdog.status(), WatchdogStatus::Released);
        assert_eq!(watchdog.queue_count(), 0);
        assert_eq!(watchdog.start(), Err(WatchdogError::Released));
        assert_eq!(watchdog.add_queue(queue), Err(WatchdogError::Released));
        Ok(())
    }
}
