//! Integration tests for starting, stopping and restarting real processes.
#![cfg(target_os = "linux")]

#[path = "common/mod.rs"]
mod common;

use std::{
    fs,
    net::TcpListener,
    thread,
    time::{Duration, Instant},
};

use common::{
    IDLE_COMMAND, ServiceGuard, api_settings, free_port, is_process_alive, settings,
    wait_for_lines, wait_for_process_exit,
};
use devctl::{
    error::DevctlError,
    pid_store::{FilePidStore, PidStore},
    probe::{PortListeners, ProcessInspector, SystemInspector, port_is_bindable},
    supervisor::{StartOutcome, StopOutcome, Supervisor},
    tasks::find_on_path,
};
use tempfile::tempdir;

#[test]
fn fresh_start_records_pid_and_writes_log() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let pid = match supervisor.start(None).unwrap() {
        StartOutcome::Started { pid, port } => {
            assert_eq!(port, api.port);
            pid
        }
        other => panic!("expected a fresh start, got {other:?}"),
    };

    assert!(is_process_alive(pid));
    assert_eq!(
        fs::read_to_string(&api.pid_path).unwrap().trim(),
        pid.to_string()
    );
    let lines = wait_for_lines(&api.log_path, 1);
    assert_eq!(lines[0], format!("booting on {}", api.port));

    assert_eq!(supervisor.stop().unwrap(), StopOutcome::Stopped { pid });
    assert!(!api.pid_path.exists());
    wait_for_process_exit(pid);
}

#[test]
fn second_start_is_a_noop() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let StartOutcome::Started { pid, .. } = supervisor.start(None).unwrap() else {
        panic!("first start should spawn");
    };

    assert_eq!(
        supervisor.start(None).unwrap(),
        StartOutcome::AlreadyRunning { pid }
    );
    assert_eq!(store.read("api").unwrap().unwrap().pid, pid);
    assert_eq!(wait_for_lines(&api.log_path, 1).len(), 1);
}

#[test]
fn restart_while_stopped_starts_the_service() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let outcome = supervisor.restart(None).unwrap();

    let StartOutcome::Started { pid, .. } = outcome else {
        panic!("restart should spawn, got {outcome:?}");
    };
    assert!(inspector.is_alive(pid));
}

#[test]
fn restart_replaces_the_running_process() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let StartOutcome::Started { pid: first, .. } = supervisor.start(None).unwrap() else {
        panic!("first start should spawn");
    };
    let StartOutcome::Started { pid: second, .. } = supervisor.restart(None).unwrap() else {
        panic!("restart should spawn");
    };

    assert_ne!(first, second);
    wait_for_process_exit(first);
    assert_eq!(store.read("api").unwrap().unwrap().pid, second);
}

#[test]
fn occupied_port_aborts_start() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _listener = TcpListener::bind((api.host.as_str(), api.port)).unwrap();

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    match supervisor.start(None) {
        Err(DevctlError::PortInUse { port, .. }) => assert_eq!(port, api.port),
        other => panic!("expected PortInUse, got {other:?}"),
    }
    assert!(!api.pid_path.exists());
    assert!(!api.log_path.exists());
}

#[test]
fn port_override_is_exported_to_the_service() {
    let temp = tempdir().unwrap();
    let settings = api_settings(temp.path(), IDLE_COMMAND);
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);
    let custom = free_port();

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let outcome = supervisor.start(Some(custom)).unwrap();

    assert!(matches!(outcome, StartOutcome::Started { port, .. } if port == custom));
    assert_eq!(
        wait_for_lines(&api.log_path, 1)[0],
        format!("booting on {custom}")
    );
}

#[test]
fn crash_during_grace_reports_log_tail() {
    let temp = tempdir().unwrap();
    let settings = api_settings(
        temp.path(),
        "sh -c 'echo ModuleNotFoundError: uvicorn >&2; exit 3'",
    );
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    match supervisor.start(None) {
        Err(DevctlError::StartFailed {
            exit_code,
            log_tail,
            ..
        }) => {
            assert_eq!(exit_code, Some(3));
            assert_eq!(log_tail, vec!["ModuleNotFoundError: uvicorn".to_string()]);
        }
        other => panic!("expected StartFailed, got {other:?}"),
    }
    assert!(!api.pid_path.exists());
}

/// Polls until `done` holds or five seconds pass.
fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(100));
    }
    false
}

#[test]
fn listening_service_owns_its_port_until_stopped() {
    if find_on_path("python3").is_none() {
        eprintln!("python3 not on PATH; skipping listening service test");
        return;
    }
    let temp = tempdir().unwrap();
    let settings = api_settings(
        temp.path(),
        "python3 -m http.server {port} --bind {host}",
    );
    let api = settings.service("api").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(api, &store);

    let supervisor = Supervisor::new(api, &store, &inspector, settings.grace);
    let StartOutcome::Started { pid, .. } = supervisor.start(None).unwrap() else {
        panic!("start should spawn");
    };

    assert!(
        eventually(|| !port_is_bindable(&api.host, api.port)),
        "service never bound port {}",
        api.port
    );
    // Without permission to see socket owners the tools report an empty set.
    if let PortListeners::Known(pids) = inspector.listeners(api.port)
        && !pids.is_empty()
    {
        assert!(pids.contains(&pid), "listeners {pids:?} should include {pid}");
    }

    assert_eq!(supervisor.stop().unwrap(), StopOutcome::Stopped { pid });
    wait_for_process_exit(pid);
    assert!(
        eventually(|| port_is_bindable(&api.host, api.port)),
        "port {} still held after stop",
        api.port
    );
}

#[test]
fn frontend_fresh_start_uses_its_own_directory() {
    let temp = tempdir().unwrap();
    let frontend_dir = temp.path().join("web");
    fs::create_dir_all(&frontend_dir).unwrap();
    let port = free_port().to_string();
    let frontend_dir_text = frontend_dir.display().to_string();
    let settings = settings(
        temp.path(),
        &[
            ("FRONTEND_DIR", &frontend_dir_text),
            ("FRONTEND_START_CMD", "sh -c 'pwd; exec sleep 30'"),
            ("FRONTEND_PORT", &port),
        ],
    );
    let frontend = settings.service("frontend").unwrap();
    let store = FilePidStore::new(&settings.state_dir);
    let inspector = SystemInspector::new();
    let _guard = ServiceGuard::new(frontend, &store);

    let supervisor = Supervisor::new(frontend, &store, &inspector, settings.grace);
    let StartOutcome::Started { pid, .. } = supervisor.start(None).unwrap() else {
        panic!("start should spawn");
    };

    assert!(is_process_alive(pid));
    assert_eq!(store.read("frontend").unwrap().unwrap().pid, pid);
    let logged = wait_for_lines(&frontend.log_path, 1);
    assert_eq!(
        fs::canonicalize(&logged[0]).unwrap(),
        fs::canonicalize(&frontend_dir).unwrap()
    );
}
