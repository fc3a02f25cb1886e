//! Prelude for queuewatch.
//!
//! # Example
//!
//! ```rust
//! use queuewatch::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let watchdog = Watchdog::new(WatchdogConfig::default(), Arc::new(LoggingListener))?;
//! watchdog.add_probe(probe_fn("cache-lock", || {}))?;
//! assert_eq!(watchdog.probe_count(), 1);
//! # Ok(())
//! # }
//! ```

pub use crate::config::{WatchdogConfig, WatchdogConfigBuilder};
pub use crate::error::{QueueError, WatchdogError, WatchdogResult};
pub use crate::listener::{BlockedReport, LoggingListener, WatchdogListener};
pub use crate::probe::{MutexProbe, Probe, probe_fn};
pub use crate::queue::{MonitoredQueue, Task, TaskId, ThreadSnapshot};
pub use crate::watchdog::{MainQueue, Watchdog, WatchdogStatus};
pub use crate::worker::WorkerQueue;
