//! Watchdog configuration.
//!
//! A [`WatchdogConfig`] is built once, validated, and handed to
//! [`Watchdog::new`](crate::Watchdog::new). It is immutable afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{WatchdogError, WatchdogResult};

/// Default round interval and per-queue timeout.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Watchdog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Time between two ping rounds.
    ///
    /// Also the default timeout of queues added with
    /// [`Watchdog::add_queue`](crate::Watchdog::add_queue) and of the probe queue.
    pub check_interval: Duration,
    /// Timeout of the main queue checker.
    pub main_queue_timeout: Duration,
    /// Emit internal diagnostic logs.
    pub verbose_logging: bool,
    /// Install the dispatch timing hook on monitored queues.
    pub dispatch_logging: bool,
    /// Register the main queue as soon as it is supplied.
    pub register_main_queue: bool,
    /// Post main-queue and probe-queue pings at the front of the queue.
    pub post_at_front_of_queue: bool,
    /// Checker name used for the main queue.
    pub main_queue_name: String,
    /// Thread name of the dedicated probe queue.
    pub probe_queue_name: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            main_queue_timeout: DEFAULT_CHECK_INTERVAL,
            verbose_logging: false,
            dispatch_logging: true,
            register_main_queue: true,
            post_at_front_of_queue: false,
            main_queue_name: "MainThread".to_string(),
            probe_queue_name: "watchdog-probes".to_string(),
        }
    }
}

impl WatchdogConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if an interval is zero or a name is empty.
    pub fn validate(&self) -> WatchdogResult<()> {
        if self.check_interval.is_zero() {
            return Err(WatchdogError::invalid_configuration(
                "check_interval must be greater than 0",
            ));
        }
        if self.main_queue_timeout.is_zero() {
            return Err(WatchdogError::invalid_configuration(
                "main_queue_timeout must be greater than 0",
            ));
        }
        if self.main_queue_name.trim().is_empty() {
            return Err(WatchdogError::invalid_configuration(
                "main_queue_name must not be empty",
            ));
        }
        if self.probe_queue_name.trim().is_empty() {
            return Err(WatchdogError::invalid_configuration(
                "probe_queue_name must not be empty",
            ));
        }
        Ok(())
    }

    /// Create a configuration builder.
    #[must_use]
    pub fn builder() -> WatchdogConfigBuilder {
        WatchdogConfigBuilder::default()
    }
}

/// Builder for [`WatchdogConfig`].
#[derive(Debug, Default)]
pub struct WatchdogConfigBuilder {
    config: WatchdogConfig,
}

impl WatchdogConfigBuilder {
    /// Set the round interval.
    #[must_use]
    pub fn check_interval(mut self, interval: Duration) -> Self {
        self.config.check_interval = interval;
        self
    }

    /// Override the main queue timeout.
    #[must_use]
    pub fn main_queue_timeout(mut self, timeout: Duration) -> Self {
        self.config.main_queue_timeout = timeout;
        self
    }

    /// Enable or disable internal diagnostic logs.
    #[must_use]
    pub fn verbose_logging(mut self, enabled: bool) -> Self {
        self.config.verbose_logging = enabled;
        self
    }

    /// Skip the dispatch timing hook on every queue.
    #[must_use]
    pub fn disable_dispatch_logging(mut self) -> Self {
        self.config.dispatch_logging = false;
        self
    }

    /// Do not register the main queue automatically.
    #[must_use]
    pub fn disable_main_queue_registration(mut self) -> Self {
        self.config.register_main_queue = false;
        self
    }

    /// Post pings with urgent priority.
    #[must_use]
    pub fn post_at_front_of_queue(mut self) -> Self {
        self.config.post_at_front_of_queue = true;
        self
    }

    /// Set the main queue checker name.
    #[must_use]
    pub fn main_queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.main_queue_name = name.into();
        self
    }

    /// Set the probe queue thread name.
    #[must_use]
    pub fn probe_queue_name(mut self, name: impl Into<String>) -> Self {
        self.config.probe_queue_name = name.into();
        self
    }

    /// Build the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn build(self) -> WatchdogResult<WatchdogConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
