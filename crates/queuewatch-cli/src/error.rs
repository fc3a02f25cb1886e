//! Error types for the queuewatch CLI

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Watchdog error: {0}")]
    Watchdog(#[from] queuewatch::WatchdogError),

    #[error("Queue error: {0}")]
    Queue(#[from] queuewatch::QueueError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::InvalidConfiguration(_) | Self::JsonError(_) => 4,
            Self::Watchdog(queuewatch::WatchdogError::InvalidConfiguration(_)) => 4,
            Self::Watchdog(_) | Self::Queue(_) => 5,
            Self::IoError(_) => 1,
        }
    }
}
