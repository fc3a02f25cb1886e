//! # queuewatch
//!
//! Runtime watchdog for cooperative worker queues.
//!
//! A background thread posts a lightweight ping to every monitored queue
//! once per round. A queue whose ping has not run after its timeout is
//! reported as blocked, together with what its thread was doing. Lock
//! probes registered with [`Watchdog::add_probe`] run on a dedicated probe
//! queue, so a deadlocked lock shows up as that queue being blocked inside
//! the named probe.
//!
//! ## Architecture
//!
//! - [`watchdog`] - controller, lifecycle and round loop
//! - [`queue`] - the [`MonitoredQueue`] capability consumed from executors
//! - [`worker`] - [`WorkerQueue`], a single-threaded executor implementing it
//! - [`probe`] - lock probes
//! - [`dispatch`] - per-task timing from dispatch log events
//! - [`listener`] - detection callbacks and [`BlockedReport`]
//! - [`config`] - [`WatchdogConfig`] and its builder
//! - [`stats`] - activity counters
//! - [`error`] - error types
//!
//! ## Threading
//!
//! - Listener callbacks never run with the watchdog lock held
//! - `on_blocked` runs on the watchdog thread
//! - `on_task_overdue` runs on the monitored queue's thread
//! - Probes run on the probe queue thread, strictly in registration order
//!
//! ## Example
//!
//! ```rust
//! use queuewatch::prelude::*;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = WatchdogConfig::builder()
//!     .check_interval(Duration::from_millis(50))
//!     .build()?;
//! let watchdog = Watchdog::new(config, Arc::new(LoggingListener))?;
//!
//! let io = Arc::new(WorkerQueue::spawn("io")?);
//! watchdog.add_queue(io.clone())?;
//! assert_eq!(watchdog.status(), WatchdogStatus::Running);
//!
//! let state = Arc::new(parking_lot::Mutex::new(Vec::<u8>::new()));
//! watchdog.add_probe(Arc::new(MutexProbe::new("state", state)))?;
//! assert_eq!(watchdog.probe_count(), 1);
//!
//! watchdog.release();
//! assert_eq!(watchdog.status(), WatchdogStatus::Released);
//! # Ok(())
//! # }
//! ```

#![deny(
    unsafe_op_in_unsafe_fn,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic_in_result_fn,
    clippy::panic,
    missing_docs,
    missing_debug_implementations
)]
#![warn(clippy::pedantic)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Internal diagnostics gated by `WatchdogConfig::verbose_logging`.
macro_rules! verbose {
    ($enabled:expr, $level:ident, $($arg:tt)+) => {
        if $enabled {
            tracing::$level!($($arg)+);
        }
    };
}

pub mod config;
pub mod dispatch;
pub mod error;
pub mod listener;
pub mod probe;
pub mod queue;
pub mod stats;
pub mod watchdog;
pub mod worker;

mod checker;

pub mod prelude;

pub use config::{DEFAULT_CHECK_INTERVAL, WatchdogConfig, WatchdogConfigBuilder};
pub use dispatch::{DispatchPrinter, DispatchTimer, OverdueTask};
pub use error::{QueueError, WatchdogError, WatchdogResult};
pub use listener::{BlockedReport, LoggingListener, WatchdogListener};
pub use probe::{FnProbe, MutexProbe, Probe, probe_fn};
pub use queue::{DispatchEvent, DispatchSink, MonitoredQueue, Task, TaskId, ThreadSnapshot};
pub use stats::WatchdogStats;
pub use watchdog::{MainQueue, Watchdog, WatchdogStatus};
pub use worker::WorkerQueue;
