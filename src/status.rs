//! Status reporting for supervised services.
use std::time::Duration;

use serde::Serialize;

use crate::{
    config::ServiceDescriptor,
    error::DevctlError,
    health::{self, Health},
    supervisor::{ServiceState, ServiceStatus, Supervisor},
};

const GREEN_BOLD: &str = "\x1b[1;32m";
const RED_BOLD: &str = "\x1b[1;31m";
const YELLOW_BOLD: &str = "\x1b[1;33m";
const RESET: &str = "\x1b[0m";

/// Status of one service plus the result of its health probe.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    #[serde(flatten)]
    pub status: ServiceStatus,
    /// Address the service is expected to answer on.
    pub url: String,
    /// Health probe result; only collected for running services with a health path.
    pub health: Option<Health>,
}

impl StatusReport {
    /// Collects the status of the service `supervisor` manages.
    pub fn collect(
        supervisor: &Supervisor<'_>,
        descriptor: &ServiceDescriptor,
        health_timeout: Duration,
    ) -> Result<Self, DevctlError> {
        let status = supervisor.status()?;
        let health = match (status.state, descriptor.health_url(descriptor.port)) {
            (ServiceState::Running, Some(url)) => Some(health::check(&url, health_timeout)),
            _ => None,
        };

        Ok(Self {
            url: format!("http://{}:{}", descriptor.host, descriptor.port),
            status,
            health,
        })
    }

    /// One-line human readable summary.
    pub fn render(&self, color: bool) -> String {
        let status = &self.status;
        let (label, paint) = match status.state {
            ServiceState::Running => ("running", GREEN_BOLD),
            ServiceState::Stopped => ("stopped", RED_BOLD),
        };
        let label = if color {
            format!("{paint}{label:<8}{RESET}")
        } else {
            format!("{label:<8}")
        };

        let mut line = format!("{:<10} {label}", status.name);

        if let Some(pid) = status.pid {
            line.push_str(&format!(" PID {pid}"));
        }
        if let Some(since) = status.since {
            line.push_str(&format!(" since {}", since.format("%Y-%m-%d %H:%M:%S")));
        }
        line.push_str(&format!(" {}", self.url));

        if let Some(health) = &self.health {
            line.push_str(&format!(" health: {health}"));
        }

        if let Some(stale) = status.stale_cleared {
            let note = DevctlError::StaleRecord {
                service: status.name.clone(),
                pid: stale,
            };
            if color {
                line.push_str(&format!(" {YELLOW_BOLD}[{note}]{RESET}"));
            } else {
                line.push_str(&format!(" [{note}]"));
            }
        }

        match &status.listeners {
            Some(pids) if status.state != ServiceState::Running && !pids.is_empty() => {
                let pids: Vec<String> = pids.iter().map(u32::to_string).collect();
                line.push_str(&format!(
                    " (port {} held by PID {})",
                    status.port,
                    pids.join(", ")
                ));
            }
            _ => {}
        }

        line
    }
}
