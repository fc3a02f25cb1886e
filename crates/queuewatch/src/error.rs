//! Error types for the watchdog.
//!
//! Only caller misuse and thread spawn failures surface as errors. A blocked
//! or closed queue is never an error: it is reported through the
//! [`WatchdogListener`](crate::listener::WatchdogListener).

use thiserror::Error;

/// Errors returned by watchdog operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WatchdogError {
    /// Invalid configuration or registration argument.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The queue is already monitored.
    #[error("Queue '{0}' is already monitored")]
    AlreadyRegistered(String),

    /// The designated main queue cannot be registered as an extra queue.
    #[error("Queue '{0}' is the main queue and cannot be added again")]
    MainQueueRegistration(String),

    /// The watchdog was released and cannot be restarted.
    #[error("Watchdog has been released")]
    Released,

    /// A watchdog-owned thread could not be spawned.
    #[error("Failed to spawn thread '{name}': {reason}")]
    ThreadSpawn {
        /// Name of the thread.
        name: String,
        /// OS error description.
        reason: String,
    },
}

impl WatchdogError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration(reason.into())
    }

    /// Create an already registered error.
    #[must_use]
    pub fn already_registered(queue: impl Into<String>) -> Self {
        Self::AlreadyRegistered(queue.into())
    }

    /// Create a main queue registration error.
    #[must_use]
    pub fn main_queue_registration(queue: impl Into<String>) -> Self {
        Self::MainQueueRegistration(queue.into())
    }

    /// Create a thread spawn error.
    #[must_use]
    pub fn thread_spawn(name: impl Into<String>, source: &std::io::Error) -> Self {
        Self::ThreadSpawn {
            name: name.into(),
            reason: source.to_string(),
        }
    }
}

/// Errors reported by a [`MonitoredQueue`](crate::queue::MonitoredQueue).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    /// The queue has quit and accepts no more tasks.
    #[error("Queue '{0}' is closed")]
    Closed(String),

    /// The queue does not implement an optional capability.
    #[error("Queue capability not supported: {0}")]
    Unsupported(&'static str),
}

/// A specialized `Result` type for watchdog operations.
pub type WatchdogResult<T> = std::result::Result<T, WatchdogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WatchdogError::already_registered("worker-1");
        assert!(err.to_string().contains("worker-1"));

        let err = WatchdogError::main_queue_registration("MainThread");
        assert!(err.to_string().contains("main queue"));

        let err = QueueError::Closed("io".to_string());
        assert_eq!(err.to_string(), "Queue 'io' is closed");
    }

    #[test]
    fn test_error_constructors() {
        let err = WatchdogError::invalid_configuration("interval is zero");
        assert!(matches!(err, WatchdogError::InvalidConfiguration(_)));

        let io = std::io::Error::other("no threads left");
        let err = WatchdogError::thread_spawn("watchdog", &io);
        assert!(matches!(
            err,
            WatchdogError::ThreadSpawn { ref name, .. } if name == "watchdog"
        ));
        assert!(err.to_string().contains("no threads left"));
    }
}
