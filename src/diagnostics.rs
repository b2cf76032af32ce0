//! Environment checks. Missing tools and directories are reported, never fatal.
use std::time::Duration;

use crate::{
    config::Settings,
    error::DevctlError,
    pid_store::PidStore,
    probe::{PortListeners, ProcessInspector},
    status::StatusReport,
    supervisor::Supervisor,
    tasks::find_on_path,
};

/// External tools devctl or the services rely on.
pub const TOOLS: &[&str] = &["sh", "git", "npm", "node", "python3", "lsof", "ss"];

/// Builds the diagnostics report, one finding per line.
pub fn report(
    settings: &Settings,
    store: &dyn PidStore,
    inspector: &dyn ProcessInspector,
    health_timeout: Duration,
) -> Vec<String> {
    let mut lines = vec!["Tools:".to_string()];
    for tool in TOOLS {
        let line = match find_on_path(tool) {
            Some(path) => format!("  ok       {tool} ({})", path.display()),
            None => format!(
                "  missing  {}",
                DevctlError::ToolMissing {
                    tool: tool.to_string()
                }
            ),
        };
        lines.push(line);
    }

    lines.push("Directories:".to_string());
    lines.push(directory_line("project root", &settings.root));
    lines.push(directory_line("state", &settings.state_dir));
    for service in &settings.services {
        lines.push(directory_line(&service.name, &service.working_dir));
    }

    lines.push("Services:".to_string());
    for service in &settings.services {
        let supervisor = Supervisor::new(service, store, inspector, settings.grace);
        match StatusReport::collect(&supervisor, service, health_timeout) {
            Ok(report) => lines.push(format!("  {}", report.render(false))),
            Err(err) => lines.push(format!("  {:<10} error: {err}", service.name)),
        }

        let listeners = match inspector.listeners(service.port) {
            PortListeners::Known(pids) if pids.is_empty() => "free".to_string(),
            PortListeners::Known(pids) => {
                let owners: Vec<String> = pids
                    .iter()
                    .map(|pid| match inspector.process_name(*pid) {
                        Some(name) => format!("{name} (PID {pid})"),
                        None => format!("PID {pid}"),
                    })
                    .collect();
                format!("in use by {}", owners.join(", "))
            }
            PortListeners::Unknown => "unknown (neither lsof nor ss usable)".to_string(),
        };
        lines.push(format!("    port {}: {listeners}", service.port));
    }

    lines
}

fn directory_line(label: &str, path: &std::path::Path) -> String {
    if path.is_dir() {
        format!("  ok       {label}: {}", path.display())
    } else {
        format!("  missing  {label}: {}", path.display())
    }
}
