//! Integration tests for status reporting through the dispatcher.
#![cfg(target_os = "linux")]

#[path = "common/mod.rs"]
mod common;

use std::{io::Cursor, time::Duration};

use common::{IDLE_COMMAND, api_settings, settings, wait_for_process_exit};
use devctl::{
    dispatch::{Action, Composite, Dispatch, Dispatcher, Invocation, Outcome, ServiceOp},
    prompt::LinePrompter,
};
use serde_json::Value;
use tempfile::tempdir;

fn prompter() -> LinePrompter<Cursor<&'static str>, Vec<u8>> {
    LinePrompter::new(Cursor::new(""), Vec::new(), false)
}

fn status_json(dispatcher: &Dispatcher) -> Vec<Value> {
    let outcome = dispatcher.dispatch(
        &Action::Composite(Composite::StatusAll),
        &Invocation {
            json: true,
            ..Invocation::default()
        },
        &mut prompter(),
    );
    let Outcome::Success(json) = outcome else {
        panic!("status-all failed: {outcome:?}");
    };
    serde_json::from_str::<Value>(&json)
        .unwrap()
        .as_array()
        .unwrap()
        .clone()
}

#[test]
fn status_all_reports_stopped_services() {
    let temp = tempdir().unwrap();
    let dispatcher = Dispatcher::system(settings(temp.path(), &[]));

    let entries = status_json(&dispatcher);
    assert_eq!(entries.len(), 2);
    for entry in &entries {
        assert_eq!(entry["state"], "stopped");
        assert!(entry["pid"].is_null());
        assert!(entry["health"].is_null());
    }
}

#[test]
fn running_service_reports_pid_and_health() {
    let temp = tempdir().unwrap();
    let dispatcher = Dispatcher::system(api_settings(temp.path(), IDLE_COMMAND))
        .with_health_timeout(Duration::from_millis(500));
    let start = Action::service("api", ServiceOp::Start);

    let outcome = dispatcher.dispatch(&start, &Invocation::default(), &mut prompter());
    assert!(outcome.message().contains("api started"), "{outcome:?}");

    let entries = status_json(&dispatcher);
    let api = entries
        .iter()
        .find(|entry| entry["name"] == "api")
        .unwrap()
        .clone();
    assert_eq!(api["state"], "running");
    let pid = api["pid"].as_u64().unwrap() as u32;
    // The idle command never answers HTTP.
    assert_eq!(api["health"]["health"], "unreachable");

    let stop = Action::service("api", ServiceOp::Stop);
    let outcome = dispatcher.dispatch(&stop, &Invocation::default(), &mut prompter());
    assert_eq!(outcome, Outcome::Success(format!("api stopped (PID {pid})")));
    wait_for_process_exit(pid);
}

#[test]
fn status_mentions_cleared_stale_record() {
    let temp = tempdir().unwrap();
    let settings = settings(temp.path(), &[]);
    let pid_path = settings.service("frontend").unwrap().pid_path.clone();
    std::fs::create_dir_all(pid_path.parent().unwrap()).unwrap();
    std::fs::write(&pid_path, "999999").unwrap();
    let dispatcher = Dispatcher::system(settings);

    let outcome = dispatcher.dispatch(
        &Action::service("frontend", ServiceOp::Status),
        &Invocation::default(),
        &mut prompter(),
    );

    assert_eq!(outcome.exit_code(), 0);
    assert!(outcome.message().contains("stopped"));
    assert!(outcome.message().contains("stale PID record (999999)"));
    assert!(!pid_path.exists());
}
