//! Configuration management for devctl.
//!
//! Every setting has a default and can be overridden through an environment
//! variable. There is no configuration file.
use std::{
    collections::BTreeMap,
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use strum_macros::{AsRefStr, Display, EnumIter, EnumString};

use crate::error::DevctlError;

/// Name of the frontend service.
pub const FRONTEND: &str = "frontend";

/// Name of the API service.
pub const API: &str = "api";

/// Default grace interval between spawning a service and declaring it started.
pub const DEFAULT_GRACE: Duration = Duration::from_millis(2000);

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_FRONTEND_PORT: u16 = 5173;
const DEFAULT_API_PORT: u16 = 8000;
const DEFAULT_FRONTEND_COMMAND: &str = "npm run dev -- --host {host} --port {port}";
const DEFAULT_API_COMMAND: &str =
    "python3 -m uvicorn app.main:app --reload --host {host} --port {port}";
const DEFAULT_API_HEALTH_PATH: &str = "/health";

/// One-shot commands a service can run to completion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, EnumString, AsRefStr, Display,
    EnumIter,
)]
#[strum(serialize_all = "kebab-case")]
pub enum TaskKind {
    Install,
    Build,
    Lint,
    Migrate,
}

/// Everything needed to supervise one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Service name, used as the key for state files.
    pub name: String,
    /// Directory the service and its tasks run in.
    pub working_dir: PathBuf,
    /// Shell command template; `{host}` and `{port}` are substituted at spawn time.
    pub command: String,
    /// Host the service binds to.
    pub host: String,
    /// Port the service binds to unless overridden for one invocation.
    pub port: u16,
    /// Append-only transcript of the service output.
    pub log_path: PathBuf,
    /// Slot holding the pid of the running service.
    pub pid_path: PathBuf,
    /// Path probed over HTTP to check health, if the service exposes one.
    pub health_path: Option<String>,
    /// One-shot task commands keyed by kind.
    pub tasks: BTreeMap<TaskKind, String>,
}

impl ServiceDescriptor {
    /// Renders the start command for the given port.
    pub fn render_command(&self, port: u16) -> String {
        self.command
            .replace("{host}", &self.host)
            .replace("{port}", &port.to_string())
    }

    /// URL used to check service health on the given port.
    pub fn health_url(&self, port: u16) -> Option<String> {
        self.health_path.as_ref().map(|path| {
            let path = if path.starts_with('/') {
                path.clone()
            } else {
                format!("/{path}")
            };
            format!("http://{}:{}{}", self.host, port, path)
        })
    }

    /// Command line for a task, if this service supports it.
    pub fn task(&self, kind: TaskKind) -> Option<&str> {
        self.tasks.get(&kind).map(String::as_str)
    }
}

/// Resolved settings for one devctl invocation.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root; git commands run here.
    pub root: PathBuf,
    /// Directory holding pid slots and logs.
    pub state_dir: PathBuf,
    /// Time a freshly spawned process must survive to count as started.
    pub grace: Duration,
    /// Supervised services, in start order.
    pub services: Vec<ServiceDescriptor>,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, DevctlError> {
        let root = match env::var_os("DEVCTL_ROOT") {
            Some(root) => PathBuf::from(root),
            None => env::current_dir()?,
        };
        Self::from_lookup(&root, |key| env::var(key).ok())
    }

    /// Builds settings rooted at `root`, reading overrides through `lookup`.
    pub fn from_lookup<F>(root: &Path, lookup: F) -> Result<Self, DevctlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let state_dir = lookup("DEVCTL_STATE_DIR")
            .map(|dir| resolve(root, &dir))
            .unwrap_or_else(|| root.join(".devctl"));

        let grace = match lookup("DEVCTL_GRACE_MS") {
            Some(raw) => Duration::from_millis(parse_number::<u64>("DEVCTL_GRACE_MS", &raw)?),
            None => DEFAULT_GRACE,
        };

        let frontend = ServiceDescriptor {
            name: FRONTEND.to_string(),
            working_dir: lookup("FRONTEND_DIR")
                .map(|dir| resolve(root, &dir))
                .unwrap_or_else(|| root.join("frontend")),
            command: lookup("FRONTEND_START_CMD")
                .unwrap_or_else(|| DEFAULT_FRONTEND_COMMAND.to_string()),
            host: lookup("FRONTEND_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port_override(&lookup, "FRONTEND_PORT", DEFAULT_FRONTEND_PORT)?,
            log_path: state_dir.join(format!("{FRONTEND}.log")),
            pid_path: state_dir.join(format!("{FRONTEND}.pid")),
            health_path: lookup("FRONTEND_HEALTH_PATH").or_else(|| Some("/".to_string())),
            tasks: BTreeMap::from([
                (TaskKind::Install, "npm install".to_string()),
                (TaskKind::Build, "npm run build".to_string()),
                (TaskKind::Lint, "npm run lint".to_string()),
            ]),
        };

        let api = ServiceDescriptor {
            name: API.to_string(),
            working_dir: lookup("API_DIR")
                .map(|dir| resolve(root, &dir))
                .unwrap_or_else(|| root.to_path_buf()),
            command: lookup("API_START_CMD").unwrap_or_else(|| DEFAULT_API_COMMAND.to_string()),
            host: lookup("API_HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port_override(&lookup, "API_PORT", DEFAULT_API_PORT)?,
            log_path: state_dir.join(format!("{API}.log")),
            pid_path: state_dir.join(format!("{API}.pid")),
            health_path: lookup("API_HEALTH_PATH")
                .or_else(|| Some(DEFAULT_API_HEALTH_PATH.to_string())),
            tasks: BTreeMap::from([
                (
                    TaskKind::Install,
                    "python3 -m pip install -r requirements.txt".to_string(),
                ),
                (TaskKind::Build, "python3 -m compileall -q app".to_string()),
                (TaskKind::Lint, "python3 -m ruff check app".to_string()),
                (TaskKind::Migrate, "alembic upgrade head".to_string()),
            ]),
        };

        Ok(Self {
            root: root.to_path_buf(),
            state_dir,
            grace,
            services: vec![frontend, api],
        })
    }

    /// Looks up a service by name.
    pub fn service(&self, name: &str) -> Result<&ServiceDescriptor, DevctlError> {
        self.services
            .iter()
            .find(|service| service.name == name)
            .ok_or_else(|| DevctlError::UnknownService(name.to_string()))
    }

    /// Names of all configured services.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|service| service.name.as_str()).collect()
    }
}

/// Parses a user supplied port, rejecting zero and anything out of range.
pub fn parse_port(raw: &str) -> Result<u16, DevctlError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(DevctlError::InvalidPort(raw.trim().to_string())),
    }
}

fn port_override<F>(lookup: &F, key: &str, default: u16) -> Result<u16, DevctlError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_port(&raw).map_err(|_| DevctlError::InvalidConfiguration {
            key: key.to_string(),
            value: raw,
            reason: "expected a port between 1 and 65535".to_string(),
        }),
        None => Ok(default),
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, DevctlError> {
    raw.trim()
        .parse::<T>()
        .map_err(|_| DevctlError::InvalidConfiguration {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected a non-negative integer".to_string(),
        })
}

fn resolve(root: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
