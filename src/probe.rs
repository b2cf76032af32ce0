//! Process table and port inspection.
//!
//! [`ProcessInspector`] is the only way the supervisor touches the OS process
//! table, so tests can substitute a scripted implementation.
use std::{
    collections::BTreeSet,
    io::ErrorKind,
    net::TcpListener,
    process::Command,
    thread,
    time::Duration,
};

use nix::{errno::Errno, sys::signal, unistd::Pid};
use regex::Regex;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};

use crate::error::DevctlError;

/// Number of liveness checks after SIGTERM before escalating to SIGKILL.
const TERMINATION_CHECKS: usize = 10;

/// Interval between liveness checks while waiting for a process to exit.
const TERMINATION_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Processes listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortListeners {
    /// The listeners could be determined. An empty set means the port is free.
    Known(BTreeSet<u32>),
    /// No inspection tool was usable; the port may or may not be free.
    Unknown,
}

impl PortListeners {
    /// Returns true only when the port is known to be free.
    pub fn is_known_free(&self) -> bool {
        matches!(self, PortListeners::Known(pids) if pids.is_empty())
    }
}

/// Capability interface over the OS process table.
pub trait ProcessInspector {
    /// Whether `pid` names a running (non-zombie) process.
    fn is_alive(&self, pid: u32) -> bool;

    /// Processes bound to `port`.
    fn listeners(&self, port: u16) -> PortListeners;

    /// Terminates `pid`, escalating if it does not exit promptly.
    fn signal(&self, pid: u32) -> Result<(), DevctlError>;

    /// Short name of the process, if it can be determined.
    fn process_name(&self, pid: u32) -> Option<String>;
}

/// [`ProcessInspector`] backed by signals, `/proc`, `lsof` and `ss`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInspector;

impl SystemInspector {
    /// Creates an inspector for the local machine.
    pub fn new() -> Self {
        Self
    }

    fn to_nix_pid(pid: u32) -> Option<Pid> {
        // Pids 0 and 1 would address our own process group or init.
        match i32::try_from(pid) {
            Ok(raw) if raw > 1 => Some(Pid::from_raw(raw)),
            _ => None,
        }
    }

    fn listeners_from_lsof(port: u16) -> Option<BTreeSet<u32>> {
        let output = Command::new("lsof")
            .args(["-nP", "-t", &format!("-iTCP:{port}"), "-sTCP:LISTEN"])
            .output();

        match output {
            Ok(output) => {
                // lsof exits 1 with no output when nothing matches.
                if output.status.success() || output.stdout.is_empty() {
                    Some(parse_lsof_pids(&String::from_utf8_lossy(&output.stdout)))
                } else {
                    None
                }
            }
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!("lsof failed while probing port {port}: {err}");
                }
                None
            }
        }
    }

    fn listeners_from_ss(port: u16) -> Option<BTreeSet<u32>> {
        let output = Command::new("ss")
            .args(["-H", "-ltnp", &format!("sport = :{port}")])
            .output();

        match output {
            Ok(output) if output.status.success() => {
                parse_ss_pids(&String::from_utf8_lossy(&output.stdout))
            }
            Ok(output) => {
                debug!("ss exited with {:?} while probing port {port}", output.status);
                None
            }
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    debug!("ss failed while probing port {port}: {err}");
                }
                None
            }
        }
    }
}

impl ProcessInspector for SystemInspector {
    fn is_alive(&self, pid: u32) -> bool {
        let Some(target) = Self::to_nix_pid(pid) else {
            return false;
        };

        match signal::kill(target, None) {
            Ok(()) => !is_zombie(pid),
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    fn listeners(&self, port: u16) -> PortListeners {
        if let Some(pids) = Self::listeners_from_lsof(port) {
            return PortListeners::Known(pids);
        }
        if let Some(pids) = Self::listeners_from_ss(port) {
            return PortListeners::Known(pids);
        }
        PortListeners::Unknown
    }

    fn signal(&self, pid: u32) -> Result<(), DevctlError> {
        let Some(target) = Self::to_nix_pid(pid) else {
            return Err(DevctlError::SignalFailed {
                pid,
                reason: "refusing to signal a reserved PID".to_string(),
            });
        };

        if !self.is_alive(pid) {
            debug!("PID {pid} already exited");
            return Ok(());
        }

        // Services run in their own session, so the whole group goes down together.
        let own_pgid = unsafe { libc::getpgid(0) };
        let child_pgid = unsafe { libc::getpgid(target.as_raw()) };
        if child_pgid > 1 && child_pgid != own_pgid {
            let result = unsafe { libc::killpg(child_pgid, libc::SIGTERM) };
            if result < 0 {
                let err = std::io::Error::last_os_error();
                debug!("Could not signal process group {child_pgid}: {err}");
            }
        }

        match signal::kill(target, Some(signal::SIGTERM)) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(err) => {
                return Err(DevctlError::SignalFailed {
                    pid,
                    reason: err.desc().to_string(),
                });
            }
        }

        for _ in 0..TERMINATION_CHECKS {
            thread::sleep(TERMINATION_CHECK_INTERVAL);
            if !self.is_alive(pid) {
                return Ok(());
            }
        }

        warn!("PID {pid} did not exit after SIGTERM; sending SIGKILL");
        if child_pgid > 1 && child_pgid != own_pgid {
            unsafe {
                libc::killpg(child_pgid, libc::SIGKILL);
            }
        }
        match signal::kill(target, Some(signal::SIGKILL)) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(err) => Err(DevctlError::SignalFailed {
                pid,
                reason: err.desc().to_string(),
            }),
        }
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        let target = sysinfo::Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system
            .process(target)
            .map(|process| process.name().to_string_lossy().into_owned())
    }
}

/// Tries to bind `host:port`; success means nothing else holds the port.
pub fn port_is_bindable(host: &str, port: u16) -> bool {
    match TcpListener::bind((host, port)) {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(err) => {
            debug!("Bind test on {host}:{port} failed: {err}");
            false
        }
    }
}

fn parse_lsof_pids(output: &str) -> BTreeSet<u32> {
    output
        .lines()
        .filter_map(|line| line.trim().parse::<u32>().ok())
        .collect()
}

/// Extracts pids from `ss -ltnp` output. Listening sockets without a visible
/// owner (another user's process) make the result unknown.
fn parse_ss_pids(output: &str) -> Option<BTreeSet<u32>> {
    let pid_pattern = Regex::new(r"pid=(\d+)").ok()?;
    let mut pids = BTreeSet::new();

    for line in output.lines().filter(|line| !line.trim().is_empty()) {
        let before = pids.len();
        for caps in pid_pattern.captures_iter(line) {
            if let Ok(pid) = caps[1].parse::<u32>() {
                pids.insert(pid);
            }
        }
        if pids.len() == before {
            return None;
        }
    }

    Some(pids)
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The command name is parenthesised and may contain spaces; the state follows it.
    stat.rfind(')')
        .and_then(|idx| stat[idx + 1..].trim_start().chars().next())
        .is_some_and(|state| matches!(state, 'Z' | 'X'))
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}
