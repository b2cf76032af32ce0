//! One-shot subprocesses: installs, builds, lints, migrations and git.
//!
//! These run in the foreground with inherited stdio and block until done.
use std::{
    env,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
};

use tracing::{debug, info};

use crate::{
    config::{ServiceDescriptor, TaskKind},
    error::DevctlError,
    supervisor::DEFAULT_SHELL,
};

/// Executes external commands on behalf of the dispatcher.
pub trait Runner {
    /// Runs a shell command line in `dir`, streaming its output to the terminal.
    fn shell(&self, command: &str, dir: &Path) -> Result<(), DevctlError>;

    /// Runs `program` with `args` in `dir`, streaming its output to the terminal.
    fn run(&self, program: &str, args: &[&str], dir: &Path) -> Result<(), DevctlError>;

    /// Runs `program` with `args` in `dir` and returns its stdout.
    fn capture(&self, program: &str, args: &[&str], dir: &Path) -> Result<String, DevctlError>;
}

/// [`Runner`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn check_status(command: String, status: ExitStatus) -> Result<(), DevctlError> {
        if status.success() {
            Ok(())
        } else {
            Err(DevctlError::CommandFailed {
                command,
                code: status.code(),
            })
        }
    }

    fn spawn_error(program: &str, err: std::io::Error) -> DevctlError {
        if err.kind() == ErrorKind::NotFound {
            DevctlError::ToolMissing {
                tool: program.to_string(),
            }
        } else {
            DevctlError::Io(err)
        }
    }
}

impl Runner for SystemRunner {
    fn shell(&self, command: &str, dir: &Path) -> Result<(), DevctlError> {
        if let Some(tool) = command.split_whitespace().next()
            && find_on_path(tool).is_none()
        {
            return Err(DevctlError::ToolMissing {
                tool: tool.to_string(),
            });
        }

        info!("Running `{command}` in {}", dir.display());
        let status = Command::new(DEFAULT_SHELL)
            .arg("-c")
            .arg(command)
            .current_dir(dir)
            .stdin(Stdio::inherit())
            .status()
            .map_err(|err| Self::spawn_error(DEFAULT_SHELL, err))?;
        Self::check_status(command.to_string(), status)
    }

    fn run(&self, program: &str, args: &[&str], dir: &Path) -> Result<(), DevctlError> {
        debug!("Running {program} {args:?} in {}", dir.display());
        let status = Command::new(program)
            .args(args)
            .current_dir(dir)
            .status()
            .map_err(|err| Self::spawn_error(program, err))?;
        Self::check_status(format!("{program} {}", args.join(" ")), status)
    }

    fn capture(&self, program: &str, args: &[&str], dir: &Path) -> Result<String, DevctlError> {
        debug!("Capturing {program} {args:?} in {}", dir.display());
        let output = Command::new(program)
            .args(args)
            .current_dir(dir)
            .stderr(Stdio::inherit())
            .output()
            .map_err(|err| Self::spawn_error(program, err))?;
        Self::check_status(format!("{program} {}", args.join(" ")), output.status)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Runs the `kind` task of `service` to completion.
pub fn run_task(
    runner: &dyn Runner,
    service: &ServiceDescriptor,
    kind: TaskKind,
) -> Result<(), DevctlError> {
    let command = service
        .task(kind)
        .ok_or_else(|| DevctlError::UnsupportedOperation {
            service: service.name.clone(),
            operation: kind.to_string(),
        })?;

    if !service.working_dir.is_dir() {
        return Err(DevctlError::ConfigurationMissing {
            what: format!("Working directory for '{}'", service.name),
            path: service.working_dir.clone(),
        });
    }

    runner.shell(command, &service.working_dir)
}

/// Finds an executable named `tool` on `PATH`.
pub fn find_on_path(tool: &str) -> Option<PathBuf> {
    let candidate = Path::new(tool);
    if candidate.components().count() > 1 {
        return is_executable(candidate).then(|| candidate.to_path_buf());
    }

    let paths = env::var_os("PATH")?;
    env::split_paths(&paths)
        .map(|dir| dir.join(tool))
        .find(|path| is_executable(path))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|metadata| metadata.is_file() && metadata.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
