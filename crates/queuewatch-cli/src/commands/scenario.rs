//! Scenario setup and the event streaming loop

use queuewatch::{
    DispatchPrinter, MainQueue, MonitoredQueue, Watchdog, WatchdogConfig, WatchdogListener, WatchdogStats,
    WorkerQueue, probe_fn,
};
use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::thread;
use std::time::{Duration, Instant};

use crate::commands::Commands;
use crate::error::CliError;
use crate::events::ChannelListener;
use crate::output;

/// Options shared by every scenario.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub config: WatchdogConfig,
    pub run_for: Duration,
    pub json: bool,
}

/// A running scenario. Queues stay alive as long as the session.
struct Session {
    watchdog: Watchdog,
    _queues: Vec<Arc<WorkerQueue>>,
}

/// Run `command` for `options.run_for`, printing every detection.
pub fn execute(command: &Commands, options: &RunOptions) -> Result<WatchdogStats, CliError> {
    let (listener, events) = ChannelListener::new();
    let listener: Arc<dyn WatchdogListener> = Arc::new(listener);
    let config = options.config.clone();

    let session = match command {
        Commands::SlowTask {
            task_ms,
            timeout_ms,
        } => slow_task(
            config,
            listener,
            Duration::from_millis(*task_ms),
            timeout_ms.map(Duration::from_millis),
        )?,
        Commands::Deadlock { extra_probes } => deadlock(config, listener, *extra_probes)?,
        Commands::MainStall { stall_ms, frames } => {
            main_stall(config, listener, Duration::from_millis(*stall_ms), *frames)?
        }
    };
    tracing::info!(
        scenario = command.name(),
        run_for_ms = %options.run_for.as_millis(),
        "Scenario running"
    );

    let deadline = Instant::now() + options.run_for;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(event) => output::print_event(&event, options.json),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => break,
        }
    }

    let stats = session.watchdog.stats();
    session.watchdog.release();
    Ok(stats)
}

fn slow_task(
    config: WatchdogConfig,
    listener: Arc<dyn WatchdogListener>,
    task: Duration,
    timeout: Option<Duration>,
) -> Result<Session, CliError> {
    let timeout = timeout.unwrap_or(config.check_interval);
    let watchdog = Watchdog::new(config, listener)?;
    let queue = Arc::new(WorkerQueue::spawn("worker")?);
    watchdog.add_queue_with(queue.clone(), timeout, false)?;

    queue.post("slow-task", Box::new(move || thread::sleep(task)))?;
    tracing::debug!(task_ms = %task.as_millis(), "Posted slow task");

    Ok(Session {
        watchdog,
        _queues: vec![queue],
    })
}

fn deadlock(
    config: WatchdogConfig,
    listener: Arc<dyn WatchdogListener>,
    extra_probes: usize,
) -> Result<Session, CliError> {
    let watchdog = Watchdog::new(config, listener)?;
    let lock = Arc::new(parking_lot::Mutex::new(0_u64));

    let probe_lock = Arc::clone(&lock);
    watchdog.add_probe(probe_fn("probe-1", move || {
        let mut held = probe_lock.lock();
        *held = held.wrapping_add(1);
        let contended = Arc::clone(&probe_lock);
        // Waits for a thread that needs the lock this probe holds.
        let child = thread::Builder::new()
            .name("lock-contender".to_string())
            .spawn(move || drop(contended.lock()));
        if let Ok(child) = child {
            drop(child.join());
        }
    }))?;

    for index in 0..extra_probes {
        let name = format!("probe-{}", index.saturating_add(2));
        watchdog.add_probe(probe_fn(name, || {}))?;
    }

    Ok(Session {
        watchdog,
        _queues: Vec::new(),
    })
}

fn main_stall(
    config: WatchdogConfig,
    listener: Arc<dyn WatchdogListener>,
    stall: Duration,
    frames: u32,
) -> Result<Session, CliError> {
    let main = Arc::new(WorkerQueue::spawn("main")?);
    let printer: DispatchPrinter =
        Arc::new(|line: &str| tracing::debug!(target: "queuewatch::dispatch", "{line}"));
    let watchdog = Watchdog::with_main_queue(
        config,
        listener,
        MainQueue::new(main.clone()).with_printer(printer),
    )?;

    for frame in 0..frames {
        main.post(
            &format!("render-frame-{frame}"),
            Box::new(|| thread::sleep(Duration::from_millis(5))),
        )?;
    }
    main.post("stall", Box::new(move || thread::sleep(stall)))?;

    Ok(Session {
        watchdog,
        _queues: vec![main],
    })
}
