//! Integration tests for the ctfbench CLI.
//!
//! These run the actual executable and check output, exit codes and file
//! system effects. Nothing here needs Docker or an API key.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

// -----------------------------------------------------------------------------
// Test helpers
// -----------------------------------------------------------------------------

const VALID_TASK: &str = r#"
name = "Echo Flag"
version = "0.3"

[ruleset]
max_turns = 3
flag = "FLAG{cli}"

[environments.main.files]
"Dockerfile" = "FROM alpine\n"

[[elicitations]]
terminal_interop_protocol = "CLOSING_ANGLE_BRACKET"

[[elicitations.prefilled_messages]]
role = "user"
content = "Print the flag."
"#;

#[allow(deprecated)]
fn ctfbench() -> Command {
    Command::cargo_bin("ctfbench").expect("failed to find ctfbench binary")
}

fn ctfbench_in(dir: &TempDir) -> Command {
    let mut cmd = ctfbench();
    cmd.current_dir(dir.path());
    cmd
}

fn write_task(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("task.toml");
    fs::write(&path, content).unwrap();
    path
}

// -----------------------------------------------------------------------------
// Help and version
// -----------------------------------------------------------------------------

#[test]
fn test_help_shows_all_commands() {
    ctfbench()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("ctfbench"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("validate"))
        .stdout(predicate::str::contains("debug-env"))
        .stdout(predicate::str::contains("init"));
}

#[test]
fn test_version_shows_version() {
    ctfbench()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ctfbench"));
}

#[test]
fn test_run_help_shows_options() {
    ctfbench()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--total-runs"))
        .stdout(predicate::str::contains("--parallel-runs"))
        .stdout(predicate::str::contains("--store-dir"))
        .stdout(predicate::str::contains("--quiet-comms"))
        .stdout(predicate::str::contains("--busy-wait-secs"));
}

#[test]
fn test_run_requires_config_and_index() {
    ctfbench()
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("CONFIG"));
}

#[test]
fn test_run_rejects_unknown_agent() {
    let dir = TempDir::new().unwrap();
    let task = write_task(&dir, VALID_TASK);

    ctfbench_in(&dir)
        .args(["run", task.to_str().unwrap(), "0", "--agent", "gemini"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown agent provider"));
}

#[test]
fn test_run_rejects_bad_elicitation_index_before_docker() {
    let dir = TempDir::new().unwrap();
    let task = write_task(&dir, VALID_TASK);

    ctfbench_in(&dir)
        .args(["run", task.to_str().unwrap(), "7", "--agent", "human"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("out of range"));
}

// -----------------------------------------------------------------------------
// validate
// -----------------------------------------------------------------------------

#[test]
fn test_validate_prints_summary() {
    let dir = TempDir::new().unwrap();
    let task = write_task(&dir, VALID_TASK);

    ctfbench_in(&dir)
        .args(["validate", task.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Echo Flag"))
        .stdout(predicate::str::contains("is valid"))
        .stdout(predicate::str::contains("CLOSING_ANGLE_BRACKET"))
        .stdout(predicate::str::contains("echoflag"));
}

#[test]
fn test_validate_missing_file_fails() {
    let dir = TempDir::new().unwrap();

    ctfbench_in(&dir)
        .args(["validate", "nope.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to read task config"));
}

#[test]
fn test_validate_rejects_unsupported_version() {
    let dir = TempDir::new().unwrap();
    let task = write_task(&dir, &VALID_TASK.replace("\"0.3\"", "\"0.1\""));

    ctfbench_in(&dir)
        .args(["validate", task.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unsupported task version"));
}

#[test]
fn test_log_file_gets_json_lines() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("ctfbench.log");

    ctfbench_in(&dir)
        .env_remove("RUST_LOG")
        .args(["init", "--force", "--log-file", log.to_str().unwrap()])
        .assert()
        .success();

    let content = fs::read_to_string(&log).unwrap();
    let first = content.lines().next().expect("log file has a line");
    let value: serde_json::Value = serde_json::from_str(first).unwrap();
    assert!(value["fields"]["message"]
        .as_str()
        .unwrap()
        .contains("Writing sample task"));
}

// -----------------------------------------------------------------------------
// init
// -----------------------------------------------------------------------------

#[test]
fn test_init_writes_sample_task() {
    let dir = TempDir::new().unwrap();

    ctfbench_in(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sample task ready"));

    assert!(dir.path().join("task.toml").exists());

    // The written sample must itself validate.
    ctfbench_in(&dir)
        .args(["validate", "task.toml"])
        .assert()
        .success();
}

#[test]
fn test_init_skips_existing_without_force() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("task.toml"), "custom").unwrap();

    ctfbench_in(&dir)
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));

    assert_eq!(
        fs::read_to_string(dir.path().join("task.toml")).unwrap(),
        "custom"
    );
}

#[test]
fn test_init_force_overwrites() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("task.toml"), "custom").unwrap();

    ctfbench_in(&dir)
        .args(["init", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("overwritten"));

    let content = fs::read_to_string(dir.path().join("task.toml")).unwrap();
    assert!(content.contains("[ruleset]"));
}
