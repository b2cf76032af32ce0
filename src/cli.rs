//! Command-line interface for devctl.
use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    config::{API, FRONTEND},
    dispatch::{Action, Composite, Invocation, ServiceOp},
    error::DevctlError,
};

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for devctl.
#[derive(Parser)]
#[command(name = "devctl", version, author)]
#[command(
    about = "Runs, stops and inspects the frontend dev server and the API server",
    long_about = None
)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// The command to execute. Without one, the interactive menu opens.
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands for devctl.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Operate on the frontend dev server.
    Frontend {
        #[command(subcommand)]
        op: ServiceCommand,
    },

    /// Operate on the API server.
    Api {
        #[command(subcommand)]
        op: ServiceCommand,
    },

    /// Install dependencies and run migrations for every service.
    SetupAll,

    /// Start every service.
    StartAll,

    /// Stop every service.
    StopAll,

    /// Restart every service.
    RestartAll,

    /// Show the status of every service.
    StatusAll {
        /// Emit machine-readable JSON output.
        #[arg(long)]
        json: bool,
    },

    /// Check tools, directories, ports and service health.
    Diagnostics,

    /// Commit pending changes and push the current branch.
    Push {
        /// Commit message; prompted for when omitted.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Run a command by its symbolic name, e.g. `api-start-port`.
    Run {
        /// Symbolic command name (see `devctl list`).
        name: String,

        /// Port override for `start-port` and `restart`.
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,

        /// Number of log lines to show.
        #[arg(short, long)]
        lines: Option<usize>,

        /// Commit message for `push`.
        #[arg(short, long)]
        message: Option<String>,
    },

    /// List every symbolic command name.
    List,

    /// Open the interactive menu.
    Menu,
}

/// Operations on a single service.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ServiceCommand {
    /// Install dependencies.
    Install,

    /// Start the service.
    Start {
        /// Bind to this port instead of the configured one.
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
    },

    /// Stop the service.
    Stop,

    /// Stop, then start the service.
    Restart {
        /// Bind to this port instead of the configured one.
        #[arg(short, long, value_parser = clap::value_parser!(u16).range(1..))]
        port: Option<u16>,
    },

    /// Build the service.
    Build,

    /// Lint the service.
    Lint,

    /// Run database migrations.
    Migrate,

    /// Show the service status.
    Status,

    /// Show recent log lines.
    Logs {
        /// Number of lines to show (default: 50).
        #[arg(short, long)]
        lines: Option<usize>,

        /// Keep printing new lines until interrupted.
        #[arg(short, long)]
        follow: bool,
    },

    /// Kill whatever listens on the service port.
    KillPort,
}

impl ServiceCommand {
    /// The dispatcher operation and invocation this command maps to.
    pub fn into_op(self) -> (ServiceOp, Invocation) {
        let mut invocation = Invocation::default();
        let op = match self {
            ServiceCommand::Install => ServiceOp::Install,
            ServiceCommand::Start { port: Some(port) } => {
                invocation.port = Some(port);
                ServiceOp::StartPort
            }
            ServiceCommand::Start { port: None } => ServiceOp::Start,
            ServiceCommand::Stop => ServiceOp::Stop,
            ServiceCommand::Restart { port } => {
                invocation.port = port;
                ServiceOp::Restart
            }
            ServiceCommand::Build => ServiceOp::Build,
            ServiceCommand::Lint => ServiceOp::Lint,
            ServiceCommand::Migrate => ServiceOp::Migrate,
            ServiceCommand::Status => ServiceOp::Status,
            ServiceCommand::Logs { lines, follow } => {
                invocation.lines = lines;
                if follow {
                    ServiceOp::Follow
                } else {
                    ServiceOp::Logs
                }
            }
            ServiceCommand::KillPort => ServiceOp::KillPort,
        };
        (op, invocation)
    }
}

/// What the binary should do for a parsed command line.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Dispatch a single action.
    Action(Action, Invocation),
    /// Print the catalog of symbolic names.
    List,
    /// Open the interactive menu.
    Menu,
}

impl Commands {
    /// Resolves the command against the configured service names.
    pub fn into_request(self, services: &[&str]) -> Result<Request, DevctlError> {
        match self {
            Commands::Frontend { op } => Ok(service_request(FRONTEND, op)),
            Commands::Api { op } => Ok(service_request(API, op)),
            Commands::SetupAll => Ok(composite_request(Composite::SetupAll)),
            Commands::StartAll => Ok(composite_request(Composite::StartAll)),
            Commands::StopAll => Ok(composite_request(Composite::StopAll)),
            Commands::RestartAll => Ok(composite_request(Composite::RestartAll)),
            Commands::StatusAll { json } => Ok(Request::Action(
                Action::Composite(Composite::StatusAll),
                Invocation {
                    json,
                    ..Invocation::default()
                },
            )),
            Commands::Diagnostics => Ok(composite_request(Composite::Diagnostics)),
            Commands::Push { message } => Ok(Request::Action(
                Action::Composite(Composite::Push),
                Invocation {
                    message,
                    ..Invocation::default()
                },
            )),
            Commands::Run {
                name,
                port,
                lines,
                message,
            } => Ok(Request::Action(
                Action::parse(&name, services)?,
                Invocation {
                    port,
                    lines,
                    message,
                    json: false,
                },
            )),
            Commands::List => Ok(Request::List),
            Commands::Menu => Ok(Request::Menu),
        }
    }
}

fn composite_request(composite: Composite) -> Request {
    Request::Action(Action::Composite(composite), Invocation::default())
}

fn service_request(service: &str, command: ServiceCommand) -> Request {
    let (op, invocation) = command.into_op();
    Request::Action(Action::service(service, op), invocation)
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
