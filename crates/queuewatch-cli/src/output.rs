//! Output formatting for CLI responses

use anyhow::Error;
use colored::*;
use queuewatch::WatchdogStats;
use serde_json::json;

use crate::events::WatchdogEvent;

/// Print error in JSON format
pub fn print_error_json(error: &Error) {
    let error_json = json!({
        "success": false,
        "error": {
            "message": error.to_string(),
        }
    });
    match serde_json::to_string_pretty(&error_json) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("Failed to format error as JSON: {e}"),
    }
}

/// Print error in human-readable format
pub fn print_error_human(error: &Error) {
    eprintln!("{} {}", "Error:".red().bold(), error);

    let mut source = error.source();
    while let Some(err) = source {
        eprintln!("  {} {}", "Caused by:".yellow(), err);
        source = err.source();
    }
}

/// Print one watchdog detection, one JSON object per line in JSON mode
pub fn print_event(event: &WatchdogEvent, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to format event as JSON: {e}"),
        }
        return;
    }

    match event {
        WatchdogEvent::Blocked { queue, report } => {
            println!("{} {}: {}", "BLOCKED".red().bold(), queue.cyan(), report);
        }
        WatchdogEvent::TaskOverdue { task } => {
            println!("{} {}", "OVERDUE".yellow().bold(), task);
        }
        WatchdogEvent::ProbeFailed { probe, message } => {
            println!("{} {}: {}", "PROBE FAILED".red(), probe.cyan(), message);
        }
    }
}

/// Print the end-of-run summary
pub fn print_summary(scenario: &str, stats: &WatchdogStats, json: bool) {
    if json {
        let output = json!({
            "success": true,
            "scenario": scenario,
            "stats": stats,
        });
        match serde_json::to_string(&output) {
            Ok(s) => println!("{s}"),
            Err(e) => eprintln!("Failed to format summary as JSON: {e}"),
        }
    } else {
        println!("{} {}", "Scenario:".bold(), scenario);
        println!("  Rounds: {} ({} clean)", stats.rounds, stats.clean_rounds);
        println!("  Blocked reports: {}", stats.blocked_reports);
        println!("  Overdue tasks: {}", stats.overdue_tasks);
        println!("  Probe failures: {}", stats.probe_failures);
    }
}
