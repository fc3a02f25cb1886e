//! Demo scenarios for the queuewatch CLI

pub mod scenario;

use clap::Subcommand;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Block a worker queue with one long task
    SlowTask {
        /// How long the task sleeps
        #[arg(long, default_value_t = 2500)]
        task_ms: u64,
        /// Queue timeout (defaults to the round interval)
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Deadlock a lock probe on the probe queue
    Deadlock {
        /// Healthy probes registered after the deadlocking one
        #[arg(long, default_value_t = 1)]
        extra_probes: usize,
    },

    /// Stall the designated main queue and print its dispatch log
    MainStall {
        /// How long the main queue stalls
        #[arg(long, default_value_t = 2500)]
        stall_ms: u64,
        /// Frames posted before the stall
        #[arg(long, default_value_t = 3)]
        frames: u32,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SlowTask { .. } => "slow-task",
            Self::Deadlock { .. } => "deadlock",
            Self::MainStall { .. } => "main-stall",
        }
    }
}
