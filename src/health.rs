//! HTTP health probes for running services.
use std::{fmt, time::Duration};

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::debug;

/// Timeout applied to a single health request.
pub const DEFAULT_HEALTH_TIMEOUT: Duration = Duration::from_secs(2);

/// Result of probing a health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "health", content = "detail", rename_all = "snake_case")]
pub enum Health {
    /// The endpoint answered with a 2xx status.
    Healthy(u16),
    /// The endpoint answered with a non-success status.
    Unhealthy(u16),
    /// No HTTP response was received.
    Unreachable(String),
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Healthy(status) => write!(f, "healthy ({status})"),
            Health::Unhealthy(status) => write!(f, "unhealthy ({status})"),
            Health::Unreachable(reason) => write!(f, "unreachable ({reason})"),
        }
    }
}

/// Issues a single GET against `url`.
pub fn check(url: &str, timeout: Duration) -> Health {
    let client = match Client::builder().timeout(timeout).no_proxy().build() {
        Ok(client) => client,
        Err(err) => return Health::Unreachable(err.to_string()),
    };

    match client.get(url).send() {
        Ok(response) => {
            let status = response.status();
            debug!("Health check {url} returned {status}");
            if status.is_success() {
                Health::Healthy(status.as_u16())
            } else {
                Health::Unhealthy(status.as_u16())
            }
        }
        Err(err) => {
            debug!("Health check {url} failed: {err}");
            let reason = if err.is_timeout() {
                "timed out".to_string()
            } else if err.is_connect() {
                "connection refused".to_string()
            } else {
                err.to_string()
            };
            Health::Unreachable(reason)
        }
    }
}
