//! End-to-end tests of the `devctl` binary.
#![cfg(target_os = "linux")]

#[path = "common/mod.rs"]
mod common;

use std::{fs, path::Path};

use assert_cmd::{Command, cargo::cargo_bin_cmd};
use common::{IDLE_COMMAND, TEST_GRACE_MS, free_port, wait_for_process_exit};
use predicates::prelude::*;
use tempfile::tempdir;

fn devctl(root: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("devctl");
    cmd.env("DEVCTL_ROOT", root)
        .env("DEVCTL_GRACE_MS", TEST_GRACE_MS)
        .env_remove("RUST_LOG")
        .env_remove("DEVCTL_STATE_DIR")
        .write_stdin("");
    cmd
}

#[test]
fn no_command_without_terminal_is_a_usage_error() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .assert()
        .code(2)
        .stderr(predicate::str::contains("stdin is not a terminal"));
}

#[test]
fn unknown_symbolic_name_is_a_usage_error() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .args(["run", "api-fly"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Unknown command 'api-fly'"))
        .stderr(predicate::str::contains("run `devctl list`"));
}

#[test]
fn suggested_catalog_command_succeeds() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .args(["run", "api-fly"])
        .assert()
        .stderr(predicate::str::contains("devctl list"));
    devctl(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("api-start"));
}

#[test]
fn zero_port_override_is_rejected() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .args(["api", "start", "--port", "0"])
        .assert()
        .code(2);
    devctl(temp.path())
        .args(["run", "api-start-port", "--port", "0"])
        .assert()
        .code(2);
    assert!(!temp.path().join(".devctl").join("api.pid").exists());
}

#[test]
fn list_names_every_command() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("frontend-start-port"))
        .stdout(predicate::str::contains("api-kill-port"))
        .stdout(predicate::str::contains("status-all"));
}

#[test]
fn status_of_stopped_service() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .args(["api", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("api").and(predicate::str::contains("stopped")));
}

#[test]
fn missing_frontend_directory_fails_start() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .env("FRONTEND_PORT", free_port().to_string())
        .args(["frontend", "start"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("Working directory for 'frontend' not found"));
}

#[test]
fn invalid_port_override_is_rejected() {
    let temp = tempdir().unwrap();
    devctl(temp.path())
        .env("API_PORT", "99999")
        .args(["api", "status"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("API_PORT"));
}

#[test]
fn start_and_stop_through_the_binary() {
    let temp = tempdir().unwrap();
    let port = free_port().to_string();
    let state = temp.path().join(".devctl");

    devctl(temp.path())
        .env("API_START_CMD", IDLE_COMMAND)
        .env("API_PORT", &port)
        .args(["api", "start"])
        .assert()
        .success()
        .stdout(predicate::str::contains("api started (PID"));

    let pid: u32 = fs::read_to_string(state.join("api.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    devctl(temp.path())
        .env("API_START_CMD", IDLE_COMMAND)
        .env("API_PORT", &port)
        .args(["run", "api-start"])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("already running (PID {pid})")));

    devctl(temp.path())
        .env("API_PORT", &port)
        .arg("stop-all")
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("[ok] api-stop: api stopped (PID {pid})")))
        .stdout(predicate::str::contains("[ok] frontend-stop: frontend is not running"));

    assert!(!state.join("api.pid").exists());
    wait_for_process_exit(pid);
}

#[test]
fn status_all_json_is_machine_readable() {
    let temp = tempdir().unwrap();
    let output = devctl(temp.path())
        .args(["status-all", "--json"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let value: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value.as_array().unwrap().len(), 2);
}
