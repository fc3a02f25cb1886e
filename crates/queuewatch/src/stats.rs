//! Watchdog activity counters.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of what the watchdog has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogStats {
    /// Rounds evaluated.
    pub rounds: u64,
    /// Rounds in which every ping completed.
    pub clean_rounds: u64,
    /// Blocked reports handed to the listener.
    pub blocked_reports: u64,
    /// Tasks flagged by dispatch timing hooks.
    pub overdue_tasks: u64,
    /// Probe invocations that panicked.
    pub probe_failures: u64,
}

impl WatchdogStats {
    /// Rounds in which at least one ping was still outstanding.
    #[must_use]
    pub fn dirty_rounds(&self) -> u64 {
        self.rounds.saturating_sub(self.clean_rounds)
    }
}

/// Lock-free counters shared by the watchdog thread and dispatch hooks.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    rounds: AtomicU64,
    clean_rounds: AtomicU64,
    blocked_reports: AtomicU64,
    overdue_tasks: AtomicU64,
    probe_failures: AtomicU64,
}

impl Counters {
    pub(crate) fn record_round(&self, clean: bool) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
        if clean {
            self.clean_rounds.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_blocked_report(&self) {
        self.blocked_reports.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_overdue_task(&self) {
        self.overdue_tasks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_probe_failure(&self) {
        self.probe_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> WatchdogStats {
        WatchdogStats {
            rounds: self.rounds.load(Ordering::Relaxed),
            clean_rounds: self.clean_rounds.load(Ordering::Relaxed),
            blocked_reports: self.blocked_reports.load(Ordering::Relaxed),
            overdue_tasks: self.overdue_tasks.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
        }
    }
}
