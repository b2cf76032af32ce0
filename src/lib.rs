//! devctl runs a project's frontend dev server and API server in the background,
//! tracks them through per-service PID files, and wraps the everyday chores around
//! them: installs, builds, lints, migrations, logs, status checks and git pushes.
//! Every operation is reachable from the command line or an interactive menu.

/// CLI interface.
pub mod cli;

/// Configuration management.
pub mod config;

/// Environment diagnostics.
pub mod diagnostics;

/// Maps command names to actions and actions to outcomes.
pub mod dispatch;

/// Error handling.
pub mod error;

/// Commit-and-push helper.
pub mod git;

/// HTTP health probes.
pub mod health;

/// Ctrl-C handling.
pub mod interrupt;

/// Service log files.
pub mod logs;

/// Interactive menu.
pub mod menu;

/// PID record persistence.
pub mod pid_store;

/// Process and port inspection.
pub mod probe;

/// User prompts.
pub mod prompt;

/// Status reports.
pub mod status;

/// Service lifecycle management.
pub mod supervisor;

/// One-shot task execution.
pub mod tasks;

#[doc(hidden)]
pub mod test_utils;
