//! Maps symbolic command names to supervisor, task and composite actions.
//!
//! Every action ends in an [`Outcome`]; errors never escape [`Dispatch::dispatch`].
//! Composite actions run every step even when an earlier one fails and report
//! failure if any step failed.
use std::{fmt, io, str::FromStr, time::Duration};

use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use tracing::{debug, info};

use crate::{
    config::{ServiceDescriptor, Settings, TaskKind, parse_port},
    diagnostics,
    error::DevctlError,
    git,
    health::DEFAULT_HEALTH_TIMEOUT,
    interrupt::FollowScope,
    logs::DEFAULT_TAIL_LINES,
    pid_store::{FilePidStore, PidStore},
    probe::{ProcessInspector, SystemInspector},
    prompt::Prompter,
    status::StatusReport,
    supervisor::{StartOutcome, StopOutcome, Supervisor},
    tasks::{Runner, SystemRunner, run_task},
};

/// Result of a dispatched action, ready for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    /// Completed, but with something the user should know about. Exits 0.
    Warning(String),
    Failure { message: String, code: i32 },
}

impl Outcome {
    /// Converts an action error into a failure outcome.
    pub fn from_error(err: &DevctlError) -> Self {
        Outcome::Failure {
            message: err.to_string(),
            code: err.exit_code(),
        }
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::Success(_) | Outcome::Warning(_) => 0,
            Outcome::Failure { code, .. } => *code,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failure { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Outcome::Success(message) | Outcome::Warning(message) => message,
            Outcome::Failure { message, .. } => message,
        }
    }
}

/// Operations available on a single service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ServiceOp {
    Install,
    Start,
    StartPort,
    Stop,
    Restart,
    Build,
    Lint,
    Migrate,
    Status,
    Logs,
    Follow,
    KillPort,
}

impl ServiceOp {
    pub fn description(&self) -> &'static str {
        match self {
            ServiceOp::Install => "Install dependencies",
            ServiceOp::Start => "Start the service",
            ServiceOp::StartPort => "Start the service on a custom port",
            ServiceOp::Stop => "Stop the service",
            ServiceOp::Restart => "Restart the service",
            ServiceOp::Build => "Build",
            ServiceOp::Lint => "Lint",
            ServiceOp::Migrate => "Run database migrations",
            ServiceOp::Status => "Show status",
            ServiceOp::Logs => "Show recent logs",
            ServiceOp::Follow => "Follow logs (Ctrl-C to stop)",
            ServiceOp::KillPort => "Kill whatever listens on the service port",
        }
    }

    /// The one-shot task this operation runs, if it is one.
    pub fn task(&self) -> Option<TaskKind> {
        match self {
            ServiceOp::Install => Some(TaskKind::Install),
            ServiceOp::Build => Some(TaskKind::Build),
            ServiceOp::Lint => Some(TaskKind::Lint),
            ServiceOp::Migrate => Some(TaskKind::Migrate),
            _ => None,
        }
    }
}

/// Actions spanning every service, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum Composite {
    SetupAll,
    StartAll,
    StopAll,
    RestartAll,
    StatusAll,
    Diagnostics,
    Push,
    Help,
}

impl Composite {
    pub fn description(&self) -> &'static str {
        match self {
            Composite::SetupAll => "Install dependencies and run migrations for every service",
            Composite::StartAll => "Start every service",
            Composite::StopAll => "Stop every service",
            Composite::RestartAll => "Restart every service",
            Composite::StatusAll => "Show the status of every service",
            Composite::Diagnostics => "Check tools, directories, ports and health",
            Composite::Push => "Commit pending changes and push",
            Composite::Help => "List every command",
        }
    }
}

/// A dispatchable action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Service { service: String, op: ServiceOp },
    Composite(Composite),
}

impl Action {
    pub fn service(service: &str, op: ServiceOp) -> Self {
        Action::Service {
            service: service.to_string(),
            op,
        }
    }

    /// Parses a symbolic name such as `api-start` or `stop-all`.
    pub fn parse(name: &str, services: &[&str]) -> Result<Self, DevctlError> {
        let name = name.trim();
        if let Ok(composite) = Composite::from_str(name) {
            return Ok(Action::Composite(composite));
        }

        services
            .iter()
            .find_map(|service| {
                name.strip_prefix(service)
                    .and_then(|rest| rest.strip_prefix('-'))
                    .and_then(|op| ServiceOp::from_str(op).ok())
                    .map(|op| Action::service(service, op))
            })
            .ok_or_else(|| DevctlError::UnknownCommand(name.to_string()))
    }

    /// Every symbolic name with its description.
    pub fn catalog(services: &[&str]) -> Vec<(String, &'static str)> {
        let mut entries = Vec::new();
        for service in services {
            for op in ServiceOp::iter() {
                entries.push((format!("{service}-{op}"), op.description()));
            }
        }
        for composite in Composite::iter() {
            entries.push((composite.to_string(), composite.description()));
        }
        entries
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Service { service, op } => write!(f, "{service}-{op}"),
            Action::Composite(composite) => write!(f, "{composite}"),
        }
    }
}

/// Parameters bound to a single dispatch. Nothing here is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Port override for `start-port` / `restart`.
    pub port: Option<u16>,
    /// Number of log lines to show.
    pub lines: Option<usize>,
    /// Commit message for `push`.
    pub message: Option<String>,
    /// Emit machine-readable output where supported.
    pub json: bool,
}

/// Anything that can execute actions on behalf of the menu or the CLI.
pub trait Dispatch {
    /// Configured service names, in display order.
    fn service_names(&self) -> Vec<String>;

    /// Whether `op` is meaningful for `service`.
    fn supports(&self, service: &str, op: ServiceOp) -> bool;

    /// Runs `action`, converting every error into a failure outcome.
    fn dispatch(
        &self,
        action: &Action,
        invocation: &Invocation,
        prompter: &mut dyn Prompter,
    ) -> Outcome;
}

/// The production dispatcher.
pub struct Dispatcher {
    settings: Settings,
    store: Box<dyn PidStore>,
    inspector: Box<dyn ProcessInspector>,
    runner: Box<dyn Runner>,
    health_timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher from explicit collaborators.
    pub fn new(
        settings: Settings,
        store: Box<dyn PidStore>,
        inspector: Box<dyn ProcessInspector>,
        runner: Box<dyn Runner>,
    ) -> Self {
        Self {
            settings,
            store,
            inspector,
            runner,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
        }
    }

    /// Creates a dispatcher backed by the filesystem and the local process table.
    pub fn system(settings: Settings) -> Self {
        let store = FilePidStore::new(&settings.state_dir);
        Self::new(
            settings,
            Box::new(store),
            Box::new(SystemInspector::new()),
            Box::new(SystemRunner),
        )
    }

    /// Overrides the health probe timeout.
    pub fn with_health_timeout(mut self, timeout: Duration) -> Self {
        self.health_timeout = timeout;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn supervisor<'a>(&'a self, service: &'a ServiceDescriptor) -> Supervisor<'a> {
        Supervisor::new(
            service,
            self.store.as_ref(),
            self.inspector.as_ref(),
            self.settings.grace,
        )
    }

    fn run_service_op(
        &self,
        service: &ServiceDescriptor,
        op: ServiceOp,
        invocation: &Invocation,
        prompter: &mut dyn Prompter,
    ) -> Result<Outcome, DevctlError> {
        let name = &service.name;
        let supervisor = self.supervisor(service);

        if let Some(kind) = op.task() {
            run_task(self.runner.as_ref(), service, kind)?;
            return Ok(Outcome::Success(format!("{name}: {kind} completed")));
        }

        match op {
            ServiceOp::Start => {
                let outcome = supervisor.start(None)?;
                Ok(describe_start(service, outcome))
            }
            ServiceOp::StartPort => {
                let port = match checked_port(invocation.port)? {
                    Some(port) => port,
                    None => prompt_port(service, prompter)?,
                };
                let outcome = supervisor.start(Some(port))?;
                Ok(describe_start(service, outcome))
            }
            ServiceOp::Stop => Ok(describe_stop(name, supervisor.stop()?)),
            ServiceOp::Restart => {
                let outcome = supervisor.restart(checked_port(invocation.port)?)?;
                Ok(describe_start(service, outcome))
            }
            ServiceOp::Status => {
                let report = StatusReport::collect(&supervisor, service, self.health_timeout)?;
                Ok(Outcome::Success(report.render(prompter.is_interactive())))
            }
            ServiceOp::Logs => {
                let lines = invocation.lines.unwrap_or(DEFAULT_TAIL_LINES);
                let log = supervisor.log();
                let tail = log.tail(lines)?;
                if tail.is_empty() {
                    return Ok(Outcome::Success(format!(
                        "Log for {name} is empty ({})",
                        log.path().display()
                    )));
                }
                for line in &tail {
                    prompter.say(line)?;
                }
                Ok(Outcome::Success(format!(
                    "{} line(s) from {}",
                    tail.len(),
                    log.path().display()
                )))
            }
            ServiceOp::Follow => {
                let lines = invocation.lines.unwrap_or(DEFAULT_TAIL_LINES);
                let log = supervisor.log();
                prompter.say(&format!(
                    "Following {} (Ctrl-C to stop)",
                    log.path().display()
                ))?;
                let scope = FollowScope::begin();
                let stdout = io::stdout();
                log.follow(&mut stdout.lock(), lines, scope.cancel_flag())?;
                Ok(Outcome::Success(format!("Stopped following {name} logs")))
            }
            ServiceOp::KillPort => {
                let outcome = supervisor.kill_port()?;
                if outcome.killed.is_empty() && outcome.failed.is_empty() {
                    return Ok(Outcome::Success(format!(
                        "Nothing is listening on port {}",
                        outcome.port
                    )));
                }
                let killed: Vec<String> = outcome.killed.iter().map(u32::to_string).collect();
                let mut message = format!(
                    "Killed PID(s) [{}] on port {}",
                    killed.join(", "),
                    outcome.port
                );
                if outcome.failed.is_empty() {
                    return Ok(Outcome::Success(message));
                }
                for (pid, reason) in &outcome.failed {
                    message.push_str(&format!("; could not kill PID {pid}: {reason}"));
                }
                Ok(Outcome::Warning(message))
            }
            ServiceOp::Install | ServiceOp::Build | ServiceOp::Lint | ServiceOp::Migrate => {
                Err(DevctlError::UnsupportedOperation {
                    service: name.clone(),
                    operation: op.to_string(),
                })
            }
        }
    }

    fn run_composite(
        &self,
        composite: Composite,
        invocation: &Invocation,
        prompter: &mut dyn Prompter,
    ) -> Result<Outcome, DevctlError> {
        match composite {
            Composite::SetupAll => {
                let mut steps = Vec::new();
                for service in &self.settings.services {
                    for op in [ServiceOp::Install, ServiceOp::Migrate] {
                        if self.supports(&service.name, op) {
                            steps.push(Action::service(&service.name, op));
                        }
                    }
                }
                Ok(self.run_steps(&steps, invocation, prompter))
            }
            Composite::StartAll => {
                Ok(self.run_steps(&self.each_service(ServiceOp::Start), invocation, prompter))
            }
            Composite::StopAll => {
                Ok(self.run_steps(&self.each_service(ServiceOp::Stop), invocation, prompter))
            }
            Composite::RestartAll => {
                // A port override only makes sense for a single service.
                let invocation = Invocation {
                    port: None,
                    ..invocation.clone()
                };
                Ok(self.run_steps(&self.each_service(ServiceOp::Restart), &invocation, prompter))
            }
            Composite::StatusAll => {
                let mut reports = Vec::new();
                for service in &self.settings.services {
                    let supervisor = self.supervisor(service);
                    reports.push(StatusReport::collect(&supervisor, service, self.health_timeout)?);
                }
                if invocation.json {
                    let json = serde_json::to_string_pretty(&reports)
                        .map_err(|err| DevctlError::Io(io::Error::other(err)))?;
                    return Ok(Outcome::Success(json));
                }
                let lines: Vec<String> = reports
                    .iter()
                    .map(|report| report.render(prompter.is_interactive()))
                    .collect();
                Ok(Outcome::Success(lines.join("\n")))
            }
            Composite::Diagnostics => {
                let lines = diagnostics::report(
                    &self.settings,
                    self.store.as_ref(),
                    self.inspector.as_ref(),
                    self.health_timeout,
                );
                Ok(Outcome::Success(lines.join("\n")))
            }
            Composite::Push => {
                let message = git::push(
                    self.runner.as_ref(),
                    &self.settings.root,
                    prompter,
                    invocation.message.as_deref(),
                )?;
                Ok(Outcome::Success(message))
            }
            Composite::Help => {
                let names = self.settings.service_names();
                let lines: Vec<String> = Action::catalog(&names)
                    .into_iter()
                    .map(|(name, description)| format!("  {name:<22} {description}"))
                    .collect();
                Ok(Outcome::Success(format!("Commands:\n{}", lines.join("\n"))))
            }
        }
    }

    fn each_service(&self, op: ServiceOp) -> Vec<Action> {
        self.settings
            .services
            .iter()
            .map(|service| Action::service(&service.name, op))
            .collect()
    }

    /// Runs every step, continuing past failures, and folds the results.
    fn run_steps(
        &self,
        steps: &[Action],
        invocation: &Invocation,
        prompter: &mut dyn Prompter,
    ) -> Outcome {
        let mut lines = Vec::with_capacity(steps.len());
        let mut failure_code = None;
        let mut warned = false;

        for step in steps {
            let outcome = self.dispatch(step, invocation, prompter);
            let tag = match &outcome {
                Outcome::Success(_) => "ok",
                Outcome::Warning(_) => {
                    warned = true;
                    "warn"
                }
                Outcome::Failure { code, .. } => {
                    failure_code.get_or_insert(*code);
                    "failed"
                }
            };
            lines.push(format!("[{tag}] {step}: {}", outcome.message()));
        }

        let message = lines.join("\n");
        match failure_code {
            Some(code) => Outcome::Failure { message, code },
            None if warned => Outcome::Warning(message),
            None => Outcome::Success(message),
        }
    }
}

impl Dispatch for Dispatcher {
    fn service_names(&self) -> Vec<String> {
        self.settings
            .service_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn supports(&self, service: &str, op: ServiceOp) -> bool {
        match (self.settings.service(service), op.task()) {
            (Ok(descriptor), Some(kind)) => descriptor.task(kind).is_some(),
            (Ok(_), None) => true,
            (Err(_), _) => false,
        }
    }

    fn dispatch(
        &self,
        action: &Action,
        invocation: &Invocation,
        prompter: &mut dyn Prompter,
    ) -> Outcome {
        info!("Dispatching {action}");
        let result = match action {
            Action::Service { service, op } => self
                .settings
                .service(service)
                .and_then(|descriptor| self.run_service_op(descriptor, *op, invocation, prompter)),
            Action::Composite(composite) => self.run_composite(*composite, invocation, prompter),
        };

        result.unwrap_or_else(|err| {
            debug!("{action} failed: {err:?}");
            Outcome::from_error(&err)
        })
    }
}

/// Rejects a port override of zero, which would let the OS pick an arbitrary port.
fn checked_port(port: Option<u16>) -> Result<Option<u16>, DevctlError> {
    match port {
        Some(0) => Err(DevctlError::InvalidPort("0".to_string())),
        other => Ok(other),
    }
}

fn prompt_port(service: &ServiceDescriptor, prompter: &mut dyn Prompter) -> Result<u16, DevctlError> {
    let answer = prompter.ask(&format!(
        "Port for {} (default {}): ",
        service.name, service.port
    ))?;
    match answer {
        Some(raw) if !raw.is_empty() => parse_port(&raw),
        _ => Err(DevctlError::Cancelled),
    }
}

fn describe_start(service: &ServiceDescriptor, outcome: StartOutcome) -> Outcome {
    match outcome {
        StartOutcome::Started { pid, port } => Outcome::Success(format!(
            "{} started (PID {pid}) at http://{}:{port}",
            service.name, service.host
        )),
        StartOutcome::AlreadyRunning { pid } => Outcome::Success(
            DevctlError::AlreadyRunning {
                service: service.name.clone(),
                pid,
            }
            .to_string(),
        ),
    }
}

fn describe_stop(name: &str, outcome: StopOutcome) -> Outcome {
    match outcome {
        StopOutcome::Stopped { pid } => Outcome::Success(format!("{name} stopped (PID {pid})")),
        StopOutcome::NotRunning => Outcome::Success(format!("{name} is not running")),
        StopOutcome::StaleCleared { pid } => Outcome::Success(format!(
            "{name} is not running; {}",
            DevctlError::StaleRecord {
                service: name.to_string(),
                pid,
            }
        )),
        StopOutcome::SignalFailed { pid, reason } => Outcome::Warning(format!(
            "{name}: could not signal PID {pid} ({reason}); record cleared"
        )),
    }
}
