//! queuewatch - watchdog demo CLI
//!
//! Runs a small hang or deadlock scenario under the queuewatch watchdog and
//! prints every detection as it happens.

#![deny(static_mut_refs)]
#![deny(unused_must_use)]
#![deny(clippy::unwrap_used)]

mod commands;
mod error;
mod events;
mod output;

use anyhow::Result;
use clap::Parser;
use queuewatch::WatchdogConfig;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::Commands;
use crate::commands::scenario::{self, RunOptions};
use crate::error::CliError;

#[derive(Parser, Debug)]
#[command(name = "queuewatch")]
#[command(about = "Watch worker queues for hangs and deadlocked locks")]
#[command(version)]
#[command(long_about = "
queuewatch runs a demo scenario under the queuewatch watchdog.
A background thread pings every monitored queue each round and reports
queues whose ping has not run in time, naming the lock probe a deadlocked
probe queue is stuck in.

Use --json for one JSON object per detection, suitable for scripting.
")]
struct Cli {
    /// Output format (human-readable or JSON)
    #[arg(
        long,
        global = true,
        help = "Output in JSON format for machine parsing"
    )]
    json: bool,

    /// Verbose logging (-vv also enables watchdog diagnostics)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Watchdog configuration file (JSON)
    #[arg(long, global = true, env = "QUEUEWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Round interval, also used as the default queue timeout
    #[arg(long, global = true)]
    interval_ms: Option<u64>,

    /// How long to watch before releasing the watchdog
    #[arg(long, global = true, default_value_t = 5)]
    run_for_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("queuewatch={log_level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if cli.json {
                output::print_error_json(&e);
            } else {
                output::print_error_human(&e);
            }
            let code = e.downcast_ref::<CliError>().map_or(1, CliError::exit_code);
            ExitCode::from(code)
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let options = RunOptions {
        config: load_config(cli)?,
        run_for: Duration::from_secs(cli.run_for_secs),
        json: cli.json,
    };
    let stats = scenario::execute(&cli.command, &options)?;
    output::print_summary(cli.command.name(), &stats, cli.json);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<WatchdogConfig, CliError> {
    let mut config = match &cli.config {
        Some(path) => read_config(path)?,
        None => WatchdogConfig::builder()
            .check_interval(Duration::from_secs(1))
            .main_queue_timeout(Duration::from_secs(1))
            .build()?,
    };

    if let Some(interval_ms) = cli.interval_ms {
        if interval_ms == 0 {
            return Err(CliError::InvalidConfiguration(
                "--interval-ms must be greater than 0".to_string(),
            ));
        }
        config.check_interval = Duration::from_millis(interval_ms);
        config.main_queue_timeout = config.check_interval;
    }
    if cli.verbose >= 2 {
        config.verbose_logging = true;
    }

    config.validate()?;
    Ok(config)
}

fn read_config(path: &Path) -> Result<WatchdogConfig, CliError> {
    let text = std::fs::read_to_string(path)?;
    let config = serde_json::from_str(&text)?;
    tracing::debug!(path = %path.display(), "Loaded watchdog configuration");
    Ok(config)
}
