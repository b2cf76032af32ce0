//! Lifecycle management for a single supervised service.
//!
//! The supervisor holds no process handles between invocations. The pid store
//! is the only memory of a running service, and every read of it doubles as a
//! liveness check that clears records naming dead processes.
use std::{
    os::unix::process::{CommandExt, ExitStatusExt},
    process::{Child, Command, Stdio},
    sync::{Mutex, MutexGuard},
    thread,
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use nix::{
    sys::wait::{WaitPidFlag, WaitStatus, waitpid},
    unistd::Pid,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    config::ServiceDescriptor,
    error::{DevctlError, Occupant, PidStoreError},
    logs::{LogSink, START_FAILURE_TAIL_LINES},
    pid_store::{PidRecord, PidStore},
    probe::{PortListeners, ProcessInspector, port_is_bindable},
};

/// Shell used to launch service commands.
pub const DEFAULT_SHELL: &str = "sh";

/// Interval between liveness polls while a freshly spawned service is in its grace period.
const GRACE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Services spawned by this process whose handles were released after start.
/// They stay our children until they exit and are reaped from here.
static DETACHED: Mutex<Vec<u32>> = Mutex::new(Vec::new());

fn detached() -> MutexGuard<'static, Vec<u32>> {
    DETACHED.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Collects the exit status of detached services that have terminated.
fn reap_detached() {
    detached().retain(|pid| {
        let Ok(raw) = i32::try_from(*pid) else {
            return false;
        };
        match waitpid(Pid::from_raw(raw), Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(status) => {
                debug!("Reaped detached service PID {pid}: {status:?}");
                false
            }
            Err(err) => {
                debug!("PID {pid} is no longer our child: {err}");
                false
            }
        }
    });
}

/// Lifecycle states of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Running,
}

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new process was spawned and survived the grace interval.
    Started { pid: u32, port: u16 },
    /// The recorded process is alive; nothing was spawned.
    AlreadyRunning { pid: u32 },
}

/// Result of a `stop`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopOutcome {
    /// The recorded process was terminated.
    Stopped { pid: u32 },
    /// There was no record.
    NotRunning,
    /// The record named a dead process and was cleared.
    StaleCleared { pid: u32 },
    /// The signal could not be delivered; the record was cleared anyway.
    SignalFailed { pid: u32, reason: String },
}

/// Point-in-time view of a service.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub since: Option<DateTime<Local>>,
    /// Pid of a stale record that this status check removed.
    pub stale_cleared: Option<u32>,
    pub host: String,
    pub port: u16,
    /// Processes bound to the configured port; `None` when they could not be determined.
    pub listeners: Option<Vec<u32>>,
}

/// Result of killing whatever listens on a service's port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KillPortOutcome {
    pub port: u16,
    pub killed: Vec<u32>,
    pub failed: Vec<(u32, String)>,
}

/// What a read of the pid slot found.
enum RecordCheck {
    Live(PidRecord),
    Absent,
    /// A record naming a dead process was found and removed.
    Stale(u32),
}

/// Drives the state machine of one service.
pub struct Supervisor<'a> {
    descriptor: &'a ServiceDescriptor,
    store: &'a dyn PidStore,
    inspector: &'a dyn ProcessInspector,
    grace: Duration,
}

impl<'a> Supervisor<'a> {
    /// Creates a supervisor for `descriptor`.
    pub fn new(
        descriptor: &'a ServiceDescriptor,
        store: &'a dyn PidStore,
        inspector: &'a dyn ProcessInspector,
        grace: Duration,
    ) -> Self {
        Self {
            descriptor,
            store,
            inspector,
            grace,
        }
    }

    fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Log sink of the supervised service.
    pub fn log(&self) -> LogSink {
        LogSink::new(&self.descriptor.log_path)
    }

    /// Reads the pid record, clearing it if the named process is gone.
    fn check_record(&self) -> Result<RecordCheck, DevctlError> {
        reap_detached();
        let record = match self.store.read(self.name()) {
            Ok(record) => record,
            Err(PidStoreError::Malformed { content, .. }) => {
                warn!(
                    "Discarding malformed PID slot for '{}' ({content})",
                    self.name()
                );
                self.store.clear(self.name())?;
                return Ok(RecordCheck::Absent);
            }
            Err(err) => return Err(err.into()),
        };

        match record {
            Some(record) if self.inspector.is_alive(record.pid) => Ok(RecordCheck::Live(record)),
            Some(record) => {
                warn!(
                    "PID {} recorded for '{}' is not running; clearing stale record",
                    record.pid,
                    self.name()
                );
                self.store.clear(self.name())?;
                Ok(RecordCheck::Stale(record.pid))
            }
            None => Ok(RecordCheck::Absent),
        }
    }

    /// Starts the service unless it is already running.
    pub fn start(&self, port_override: Option<u16>) -> Result<StartOutcome, DevctlError> {
        if let RecordCheck::Live(record) = self.check_record()? {
            info!("'{}' already running with PID {}", self.name(), record.pid);
            return Ok(StartOutcome::AlreadyRunning { pid: record.pid });
        }

        let port = port_override.unwrap_or(self.descriptor.port);
        self.ensure_port_free(port)?;

        if !self.descriptor.working_dir.is_dir() {
            return Err(DevctlError::ConfigurationMissing {
                what: format!("Working directory for '{}'", self.name()),
                path: self.descriptor.working_dir.clone(),
            });
        }

        let log = self.log();
        let mut child = self.spawn(port, &log)?;
        let pid = child.id();
        debug!("'{}' spawned with PID {pid}; waiting {:?}", self.name(), self.grace);

        if let Some(exit_code) = self.wait_out_grace(&mut child)? {
            let log_tail = log.tail(START_FAILURE_TAIL_LINES).unwrap_or_default();
            return Err(DevctlError::StartFailed {
                service: self.name().to_string(),
                exit_code,
                log_tail,
            });
        }

        if let Err(err) = self.store.record(self.name(), pid) {
            warn!(
                "Could not record PID {pid} for '{}'; terminating it: {err}",
                self.name()
            );
            if let Err(signal_err) = self.inspector.signal(pid) {
                warn!("Failed to terminate unrecorded PID {pid}: {signal_err}");
            }
            let _ = child.kill();
            let _ = child.wait();
            return Err(err.into());
        }
        detached().push(pid);
        info!("'{}' running with PID {pid} on port {port}", self.name());
        Ok(StartOutcome::Started { pid, port })
    }

    fn ensure_port_free(&self, port: u16) -> Result<(), DevctlError> {
        match self.inspector.listeners(port) {
            // An empty answer can also mean the tool could not see the socket.
            PortListeners::Known(pids) if pids.is_empty() => {
                if port_is_bindable(&self.descriptor.host, port) {
                    Ok(())
                } else {
                    Err(DevctlError::PortInUse {
                        service: self.name().to_string(),
                        port,
                        occupants: Vec::new(),
                    })
                }
            }
            PortListeners::Known(pids) => Err(DevctlError::PortInUse {
                service: self.name().to_string(),
                port,
                occupants: pids
                    .into_iter()
                    .map(|pid| Occupant {
                        pid,
                        name: self.inspector.process_name(pid),
                    })
                    .collect(),
            }),
            PortListeners::Unknown => {
                debug!("Port listeners unknown for {port}; falling back to a bind test");
                if port_is_bindable(&self.descriptor.host, port) {
                    Ok(())
                } else {
                    Err(DevctlError::PortInUse {
                        service: self.name().to_string(),
                        port,
                        occupants: Vec::new(),
                    })
                }
            }
        }
    }

    fn spawn(&self, port: u16, log: &LogSink) -> Result<Child, DevctlError> {
        let command = self.descriptor.render_command(port);
        let stdout = log.open_append()?;
        let stderr = stdout.try_clone()?;

        let mut cmd = Command::new(DEFAULT_SHELL);
        cmd.arg("-c")
            .arg(format!("exec {command}"))
            .current_dir(&self.descriptor.working_dir)
            .env("HOST", &self.descriptor.host)
            .env("PORT", port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));

        unsafe {
            cmd.pre_exec(|| {
                // Detach from the controlling terminal so the service outlives devctl.
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!("Launching '{}': `{command}`", self.name());
        cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                DevctlError::ToolMissing {
                    tool: DEFAULT_SHELL.to_string(),
                }
            } else {
                DevctlError::Io(source)
            }
        })
    }

    /// Polls the child for the grace interval. Returns `Some(exit_code)` if it exited.
    fn wait_out_grace(&self, child: &mut Child) -> Result<Option<Option<i32>>, DevctlError> {
        let deadline = Instant::now() + self.grace;
        loop {
            if let Some(status) = child.try_wait()? {
                debug!(
                    "'{}' exited during grace interval: code {:?}, signal {:?}",
                    self.name(),
                    status.code(),
                    status.signal()
                );
                return Ok(Some(status.code()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            thread::sleep(GRACE_POLL_INTERVAL.min(deadline - now));
        }
    }

    /// Stops the service if it has a live record; the record is cleared regardless.
    pub fn stop(&self) -> Result<StopOutcome, DevctlError> {
        let record = match self.check_record()? {
            RecordCheck::Live(record) => record,
            RecordCheck::Absent => return Ok(StopOutcome::NotRunning),
            RecordCheck::Stale(pid) => return Ok(StopOutcome::StaleCleared { pid }),
        };

        let signal_result = self.inspector.signal(record.pid);
        self.store.clear(self.name())?;

        match signal_result {
            Ok(()) => {
                info!("Stopped '{}' (PID {})", self.name(), record.pid);
                Ok(StopOutcome::Stopped { pid: record.pid })
            }
            Err(err) => {
                warn!("Could not signal '{}': {err}", self.name());
                Ok(StopOutcome::SignalFailed {
                    pid: record.pid,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Reports the current state, self-healing stale records.
    pub fn status(&self) -> Result<ServiceStatus, DevctlError> {
        let (state, record, stale_cleared) = match self.check_record()? {
            RecordCheck::Live(record) => (ServiceState::Running, Some(record), None),
            RecordCheck::Absent => (ServiceState::Stopped, None, None),
            RecordCheck::Stale(pid) => (ServiceState::Stopped, None, Some(pid)),
        };

        let listeners = match self.inspector.listeners(self.descriptor.port) {
            PortListeners::Known(pids) => Some(pids.into_iter().collect()),
            PortListeners::Unknown => None,
        };

        Ok(ServiceStatus {
            name: self.name().to_string(),
            state,
            pid: record.as_ref().map(|record| record.pid),
            since: record.and_then(|record| record.recorded_at),
            stale_cleared,
            host: self.descriptor.host.clone(),
            port: self.descriptor.port,
            listeners,
        })
    }

    /// Stops (best-effort) and starts the service.
    pub fn restart(&self, port_override: Option<u16>) -> Result<StartOutcome, DevctlError> {
        match self.stop() {
            Ok(outcome) => debug!("Restart of '{}': stop step {outcome:?}", self.name()),
            Err(err) => warn!("Ignoring stop failure while restarting '{}': {err}", self.name()),
        }
        self.start(port_override)
    }

    /// Terminates every process listening on the service's configured port.
    pub fn kill_port(&self) -> Result<KillPortOutcome, DevctlError> {
        reap_detached();
        let port = self.descriptor.port;
        let pids = match self.inspector.listeners(port) {
            PortListeners::Known(pids) => pids,
            PortListeners::Unknown => {
                return Err(DevctlError::ToolMissing {
                    tool: "lsof".to_string(),
                });
            }
        };

        let recorded = match self.store.read(self.name()) {
            Ok(record) => record.map(|record| record.pid),
            Err(err) => {
                debug!("Ignoring unreadable PID slot during kill-port: {err}");
                None
            }
        };

        let mut outcome = KillPortOutcome {
            port,
            killed: Vec::new(),
            failed: Vec::new(),
        };

        for pid in pids {
            match self.inspector.signal(pid) {
                Ok(()) => outcome.killed.push(pid),
                Err(err) => outcome.failed.push((pid, err.to_string())),
            }
            if recorded == Some(pid) {
                self.store.clear(self.name())?;
            }
        }

        Ok(outcome)
    }
}
