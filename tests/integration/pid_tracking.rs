//! Integration tests covering PID record healing and persistence across invocations.
#![cfg(target_os = "linux")]

#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{IDLE_COMMAND, ServiceGuard, api_settings, wait_for_process_exit};
use devctl::{
    pid_store::{FilePidStore, PidStore},
    probe::SystemInspector,
    supervisor::{ServiceState, StartOutcome, StopOutcome, Supervisor},
};
use nix::{sys::signal, unistd::Pid};
use tempfile::tempdir;

#[test]
fn stale_record_is_cleared_by_status() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    fs::create_dir_all(&settings.state_dir).unwrap();
    fs::write(&api.pid_path, "999999\n").unwrap();

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let status = supervisor.status().unwrap();

    assert_eq!(status.state, ServiceState::Stopped);
    assert_eq!(status.stale_cleared, Some(999_999));
    assert!(!api.pid_path.exists());
}

#[test]
fn stale_record_does_not_block_start() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);
    store.record("api", 999_999).unwrap();

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let outcome = supervisor.start(None).unwrap();

    let StartOutcome::Started { pid, .. } = outcome else {
        panic!("expected a fresh start, got {outcome:?}");
    };
    assert_ne!(pid, 999_999);
    assert_eq!(store.read("api").unwrap().unwrap().pid, pid);
}

#[test]
fn malformed_record_is_discarded() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    fs::create_dir_all(&settings.state_dir).unwrap();
    fs::write(&api.pid_path, "not-a-pid").unwrap();

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    assert_eq!(supervisor.stop().unwrap(), StopOutcome::NotRunning);
    assert!(!api.pid_path.exists());
}

#[test]
fn externally_killed_service_is_reported_stale_on_stop() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let StartOutcome::Started { pid, .. } = supervisor.start(None).unwrap() else {
        panic!("start should spawn");
    };

    signal::kill(Pid::from_raw(pid as i32), Some(signal::SIGKILL)).unwrap();
    wait_for_process_exit(pid);

    assert_eq!(supervisor.stop().unwrap(), StopOutcome::StaleCleared { pid });
    assert!(!api.pid_path.exists());
}

#[test]
fn record_survives_across_invocations() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let first_store = FilePidStore::new(&settings.state_dir);
    let _guard = ServiceGuard::new(api, &first_store);

    let pid = {
        let inspector = SystemInspector::new();
        let supervisor = Supervisor::new(api, &first_store, &inspector, settings.grace);
        match supervisor.start(None).unwrap() {
            StartOutcome::Started { pid, .. } => pid,
            other => panic!("expected a fresh start, got {other:?}"),
        }
    };

    // A later invocation only has the state directory to go on.
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let status = supervisor.status().unwrap();

    assert_eq!(status.state, ServiceState::Running);
    assert_eq!(status.pid, Some(pid));
    assert!(status.since.is_some());

    assert_eq!(supervisor.stop().unwrap(), StopOutcome::Stopped { pid });
    assert!(first_store.read("api").unwrap().is_none());
}
