//! Commit-and-push helper.
use std::path::Path;

use tracing::info;

use crate::{error::DevctlError, prompt::Prompter, tasks::Runner};

/// Pushes the repository at `root`, committing pending changes first.
///
/// With pending changes a commit message is taken from `message` or asked
/// for; an empty answer cancels. A clean tree is pushed as is.
pub fn push(
    runner: &dyn Runner,
    root: &Path,
    prompter: &mut dyn Prompter,
    message: Option<&str>,
) -> Result<String, DevctlError> {
    let status = runner.capture("git", &["status", "--short"], root)?;
    let changes: Vec<&str> = status.lines().filter(|line| !line.trim().is_empty()).collect();

    if changes.is_empty() {
        info!("Working tree clean; pushing");
        runner.run("git", &["push"], root)?;
        return Ok("Nothing to commit; pushed current branch".to_string());
    }

    prompter.say(&format!("{} changed file(s):", changes.len()))?;
    for change in &changes {
        prompter.say(&format!("  {change}"))?;
    }

    let message = match message {
        Some(message) => message.trim().to_string(),
        None => prompter
            .ask("Commit message (empty to cancel): ")?
            .unwrap_or_default(),
    };
    if message.is_empty() {
        return Err(DevctlError::Cancelled);
    }

    runner.run("git", &["add", "-A"], root)?;
    runner.run("git", &["commit", "-m", &message], root)?;
    runner.run("git", &["push"], root)?;

    Ok(format!(
        "Committed {} file(s) and pushed: {message}",
        changes.len()
    ))
}
