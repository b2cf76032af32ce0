//! Error handling for devctl.
use std::path::PathBuf;

use thiserror::Error;

/// Exit code used for failures that do not carry a subprocess status.
pub const GENERIC_FAILURE_CODE: i32 = 1;

/// Exit code used for malformed invocations.
pub const USAGE_ERROR_CODE: i32 = 2;

/// Defines all errors an action can surface to the dispatcher.
#[derive(Debug, Error)]
pub enum DevctlError {
    /// A directory the action needs does not exist.
    #[error("{what} not found at {}", path.display())]
    ConfigurationMissing {
        /// Human readable description of the missing item.
        what: String,
        /// Location that was expected to exist.
        path: PathBuf,
    },

    /// An environment override could not be interpreted.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidConfiguration {
        /// Environment variable name.
        key: String,
        /// Raw value that was rejected.
        value: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The configured port is bound by another process.
    #[error("Port {port} for '{service}' is already in use{}", describe_occupants(occupants))]
    PortInUse {
        /// Service that wanted the port.
        service: String,
        /// Port that is occupied.
        port: u16,
        /// Processes bound to the port, when they could be determined.
        occupants: Vec<Occupant>,
    },

    /// The spawned process died within the grace interval.
    #[error("Service '{service}' exited during startup{}{}", describe_exit(*exit_code), describe_tail(log_tail))]
    StartFailed {
        /// Service that failed to start.
        service: String,
        /// Exit code of the spawned process, if it exited normally.
        exit_code: Option<i32>,
        /// Most recent lines of the service log.
        log_tail: Vec<String>,
    },

    /// A recorded pid no longer referred to a live process.
    #[error("Service '{service}' had a stale PID record ({pid}); cleared")]
    StaleRecord {
        /// Service whose record was stale.
        service: String,
        /// Pid that was recorded.
        pid: u32,
    },

    /// Start was requested for a service that is already running.
    #[error("Service '{service}' is already running (PID {pid})")]
    AlreadyRunning {
        /// Service that is running.
        service: String,
        /// Pid of the running process.
        pid: u32,
    },

    /// A termination signal could not be delivered.
    #[error("Failed to signal PID {pid}: {reason}")]
    SignalFailed {
        /// Pid that was targeted.
        pid: u32,
        /// Underlying OS error description.
        reason: String,
    },

    /// A required external utility is not installed.
    #[error("Required tool '{tool}' is not available on PATH")]
    ToolMissing {
        /// Name of the missing executable.
        tool: String,
    },

    /// A one-shot subprocess exited unsuccessfully.
    #[error("`{command}` failed{}", describe_exit(*code))]
    CommandFailed {
        /// Command line that was executed.
        command: String,
        /// Exit code of the command, if it exited normally.
        code: Option<i32>,
    },

    /// A service name that is not configured.
    #[error("Unknown service '{0}'")]
    UnknownService(String),

    /// A symbolic command name that the dispatcher does not know.
    #[error("Unknown command '{0}' (run `devctl list` for a list)")]
    UnknownCommand(String),

    /// The operation does not apply to the service.
    #[error("'{operation}' is not available for service '{service}'")]
    UnsupportedOperation {
        /// Service the operation was requested for.
        service: String,
        /// Operation name.
        operation: String,
    },

    /// A port value supplied by the user was rejected.
    #[error("Invalid port '{0}': expected an integer between 1 and 65535")]
    InvalidPort(String),

    /// The user cancelled an interactive prompt.
    #[error("Cancelled")]
    Cancelled,

    /// Error from the PID store.
    #[error("PID store error: {0}")]
    PidStore(#[from] PidStoreError),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DevctlError {
    /// Exit code the binary reports for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DevctlError::CommandFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            DevctlError::UnknownCommand(_) | DevctlError::InvalidPort(_) => {
                USAGE_ERROR_CODE
            }
            _ => GENERIC_FAILURE_CODE,
        }
    }
}

/// A process observed listening on a port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    /// Process identifier.
    pub pid: u32,
    /// Process name, when the process table could be read.
    pub name: Option<String>,
}

fn describe_occupants(occupants: &[Occupant]) -> String {
    if occupants.is_empty() {
        return " (occupying process unknown)".to_string();
    }

    let names: Vec<String> = occupants
        .iter()
        .map(|occupant| match &occupant.name {
            Some(name) => format!("{name} (PID {})", occupant.pid),
            None => format!("PID {}", occupant.pid),
        })
        .collect();
    format!(" by {}", names.join(", "))
}

fn describe_exit(code: Option<i32>) -> String {
    match code {
        Some(code) => format!(" with exit code {code}"),
        None => " (terminated by signal)".to_string(),
    }
}

fn describe_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        return "; log is empty".to_string();
    }
    format!("; last log lines:\n{}", lines.join("\n"))
}

/// Error type for PID store operations.
#[derive(Debug, Error)]
pub enum PidStoreError {
    /// Error reading, writing or removing a pid slot.
    #[error("Failed to access PID slot {}: {source}", path.display())]
    Io {
        /// Slot that was being accessed.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// The slot exists but does not hold a usable process identifier.
    #[error("PID slot for '{service}' holds malformed content '{content}'")]
    Malformed {
        /// Service owning the slot.
        service: String,
        /// Raw slot content.
        content: String,
    },
}
