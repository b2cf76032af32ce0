use std::{
    collections::{BTreeSet, HashMap, HashSet},
    path::Path,
    sync::{Mutex, MutexGuard},
};

use crate::{
    error::DevctlError,
    probe::{PortListeners, ProcessInspector},
    tasks::Runner,
};

/// Scripted [`ProcessInspector`] for tests.
#[derive(Debug, Default)]
pub struct FakeInspector {
    alive: Mutex<HashSet<u32>>,
    listeners: Mutex<HashMap<u16, BTreeSet<u32>>>,
    names: HashMap<u32, String>,
    port_inspection_unavailable: bool,
    fail_signals: bool,
    signalled: Mutex<Vec<u32>>,
}

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeInspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alive(self, pid: u32) -> Self {
        guard(&self.alive).insert(pid);
        self
    }

    pub fn with_listener(self, port: u16, pid: u32) -> Self {
        guard(&self.listeners).entry(port).or_default().insert(pid);
        self
    }

    pub fn with_name(mut self, pid: u32, name: &str) -> Self {
        self.names.insert(pid, name.to_string());
        self
    }

    pub fn without_port_inspection(mut self) -> Self {
        self.port_inspection_unavailable = true;
        self
    }

    pub fn failing_signals(mut self) -> Self {
        self.fail_signals = true;
        self
    }

    /// Pids passed to [`ProcessInspector::signal`], in call order.
    pub fn signalled(&self) -> Vec<u32> {
        guard(&self.signalled).clone()
    }
}

impl ProcessInspector for FakeInspector {
    fn is_alive(&self, pid: u32) -> bool {
        guard(&self.alive).contains(&pid)
    }

    fn listeners(&self, port: u16) -> PortListeners {
        if self.port_inspection_unavailable {
            return PortListeners::Unknown;
        }
        PortListeners::Known(guard(&self.listeners).get(&port).cloned().unwrap_or_default())
    }

    fn signal(&self, pid: u32) -> Result<(), DevctlError> {
        guard(&self.signalled).push(pid);
        if self.fail_signals {
            return Err(DevctlError::SignalFailed {
                pid,
                reason: "Operation not permitted".to_string(),
            });
        }

        guard(&self.alive).remove(&pid);
        for pids in guard(&self.listeners).values_mut() {
            pids.remove(&pid);
        }
        Ok(())
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.names.get(&pid).cloned()
    }
}

/// [`Runner`] that records command lines instead of executing them.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    calls: Mutex<Vec<String>>,
    captures: HashMap<String, String>,
    failures: HashMap<String, i32>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Output returned when `command` is captured.
    pub fn with_capture(mut self, command: &str, output: &str) -> Self {
        self.captures.insert(command.to_string(), output.to_string());
        self
    }

    /// Makes `command` exit with `code`.
    pub fn failing(mut self, command: &str, code: i32) -> Self {
        self.failures.insert(command.to_string(), code);
        self
    }

    /// Command lines executed so far.
    pub fn calls(&self) -> Vec<String> {
        guard(&self.calls).clone()
    }

    fn execute(&self, line: String) -> Result<(), DevctlError> {
        guard(&self.calls).push(line.clone());
        match self.failures.get(&line) {
            Some(code) => Err(DevctlError::CommandFailed {
                command: line,
                code: Some(*code),
            }),
            None => Ok(()),
        }
    }
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

impl Runner for RecordingRunner {
    fn shell(&self, command: &str, _dir: &Path) -> Result<(), DevctlError> {
        self.execute(command.to_string())
    }

    fn run(&self, program: &str, args: &[&str], _dir: &Path) -> Result<(), DevctlError> {
        self.execute(command_line(program, args))
    }

    fn capture(&self, program: &str, args: &[&str], _dir: &Path) -> Result<String, DevctlError> {
        let line = command_line(program, args);
        self.execute(line.clone())?;
        Ok(self.captures.get(&line).cloned().unwrap_or_default())
    }
}
