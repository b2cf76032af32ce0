#![allow(dead_code)]

use std::{
    fs,
    net::TcpListener,
    path::Path,
    thread,
    time::{Duration, Instant},
};

use devctl::{
    config::{ServiceDescriptor, Settings},
    pid_store::{FilePidStore, PidStore},
    probe::{ProcessInspector, SystemInspector},
    supervisor::Supervisor,
};
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Grace interval used by tests; long enough for `sh` to exec its target.
pub const TEST_GRACE_MS: &str = "300";

/// A command that logs a line and then idles until signalled.
pub const IDLE_COMMAND: &str = "sh -c 'echo booting on $PORT; exec sleep 30'";

/// Settings rooted at `root` with the given environment overrides.
pub fn settings(root: &Path, vars: &[(&str, &str)]) -> Settings {
    let vars: Vec<(String, String)> = vars
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    Settings::from_lookup(root, |key| {
        vars.iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.clone())
            .or_else(|| (key == "DEVCTL_GRACE_MS").then(|| TEST_GRACE_MS.to_string()))
    })
    .expect("test settings should be valid")
}

/// Settings whose API runs `command` in `root` on a free port.
pub fn api_settings(root: &Path, command: &str) -> Settings {
    let port = free_port().to_string();
    settings(root, &[("API_START_CMD", command), ("API_PORT", &port)])
}

/// Reserves and releases an ephemeral port.
pub fn free_port() -> u16 {
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

/// Stops the service when dropped so failing tests do not leak processes.
pub struct ServiceGuard<'a> {
    descriptor: &'a ServiceDescriptor,
    store: &'a FilePidStore,
}

impl<'a> ServiceGuard<'a> {
    pub fn new(descriptor: &'a ServiceDescriptor, store: &'a FilePidStore) -> Self {
        Self { descriptor, store }
    }
}

impl Drop for ServiceGuard<'_> {
    fn drop(&mut self) {
        let inspector = SystemInspector::new();
        if let Ok(Some(record)) = self.store.read(&self.descriptor.name)
            && inspector.is_alive(record.pid)
        {
            let supervisor =
                Supervisor::new(self.descriptor, self.store, &inspector, Duration::ZERO);
            let _ = supervisor.stop();
        }
    }
}

pub fn wait_for_lines(path: &Path, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            let lines: Vec<_> = content.lines().map(|line| line.to_string()).collect();
            if lines.len() >= expected {
                return lines;
            }
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for {expected} lines in {:?}", path);
        }

        thread::sleep(Duration::from_millis(100));
    }
}

#[cfg(target_os = "linux")]
pub fn wait_for_process_exit(pid: u32) {
    use std::path::PathBuf;

    let deadline = Instant::now() + Duration::from_secs(10);
    let proc_path = PathBuf::from(format!("/proc/{}", pid));
    let stat_path = PathBuf::from(format!("/proc/{}/stat", pid));

    while Instant::now() < deadline {
        if !proc_path.exists() {
            return;
        }

        // Killed but not yet reaped counts as exited.
        if let Ok(stat) = fs::read_to_string(&stat_path)
            && let Some(state_start) = stat.rfind(')')
            && let Some(state_char) = stat[state_start + 1..].trim().chars().next()
            && (state_char == 'Z' || state_char == 'X')
        {
            return;
        }

        thread::sleep(Duration::from_millis(100));
    }

    panic!("Timed out waiting for PID {} to exit", pid);
}

pub fn is_process_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system.process(Pid::from_u32(pid)).is_some()
}
