//! Integration tests for the queuewatch CLI
//!
//! Each test runs a short scenario end to end and checks the detections
//! printed in JSON mode.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn queuewatch() -> Result<Command, Box<dyn std::error::Error>> {
    Ok(Command::cargo_bin("queuewatch")?)
}

/// Parse every stdout line as JSON.
fn json_lines(stdout: &[u8]) -> Result<Vec<Value>, Box<dyn std::error::Error>> {
    let text = std::str::from_utf8(stdout)?;
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(Into::into))
        .collect()
}

fn events<'a>(lines: &'a [Value], kind: &str) -> Vec<&'a Value> {
    lines.iter().filter(|line| line["event"] == kind).collect()
}

#[test]
fn test_slow_task_reports_blocked_worker() -> TestResult {
    let output = queuewatch()?
        .args([
            "--json",
            "--interval-ms",
            "150",
            "--run-for-secs",
            "2",
            "slow-task",
            "--task-ms",
            "900",
        ])
        .output()?;
    assert!(output.status.success());

    let lines = json_lines(&output.stdout)?;
    let blocked = events(&lines, "blocked");
    assert!(blocked.len() >= 2, "expected repeated blocked reports: {lines:?}");
    for event in &blocked {
        assert_eq!(event["queue"], "worker");
        assert_eq!(
            event["report"]["description"],
            "Blocked in handler on worker (worker)"
        );
    }

    let overdue = events(&lines, "task_overdue");
    assert!(overdue.iter().any(|event| event["task"] == "slow-task"));

    let summary = lines.last().ok_or("missing summary")?;
    assert_eq!(summary["success"], true);
    assert_eq!(summary["scenario"], "slow-task");
    Ok(())
}

#[test]
fn test_deadlock_names_the_probe() -> TestResult {
    let output = queuewatch()?
        .args([
            "--json",
            "--interval-ms",
            "100",
            "--run-for-secs",
            "1",
            "deadlock",
        ])
        .output()?;
    assert!(output.status.success());

    let lines = json_lines(&output.stdout)?;
    let blocked = events(&lines, "blocked");
    let first = blocked.first().ok_or("no blocked report")?;
    assert_eq!(first["queue"], "watchdog-probes");
    assert_eq!(first["report"]["blocked_probe"], "probe-1");
    Ok(())
}

#[test]
fn test_human_output_for_main_stall() -> TestResult {
    queuewatch()?
        .args([
            "--interval-ms",
            "100",
            "--run-for-secs",
            "1",
            "main-stall",
            "--stall-ms",
            "500",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("BLOCKED"))
        .stdout(predicate::str::contains("Blocked in handler on MainThread (main)"))
        .stdout(predicate::str::contains("main-stall"))
        .stdout(predicate::str::contains("Blocked reports:"));
    Ok(())
}

#[test]
fn test_invalid_interval_exit_code() -> TestResult {
    queuewatch()?
        .args(["--interval-ms", "0", "slow-task"])
        .assert()
        .code(4)
        .stderr(predicate::str::contains("Invalid configuration"));
    Ok(())
}

#[test]
fn test_missing_config_file_fails() -> TestResult {
    let dir = tempfile::tempdir()?;
    let missing = dir.path().join("absent.json");
    queuewatch()?
        .args(["--config"])
        .arg(&missing)
        .arg("deadlock")
        .assert()
        .failure();
    Ok(())
}
