//! Durable per-service record of the process that currently owns a service.
//!
//! Each service has a single slot. The file-backed store keeps one
//! `<service>.pid` file per service holding nothing but the process id; the
//! recording time is read back from the file's modification time.
use std::{
    collections::HashMap,
    fs,
    io::ErrorKind,
    path::PathBuf,
    sync::Mutex,
};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::PidStoreError;

/// The recorded owner of a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    /// Service the record belongs to.
    pub service: String,
    /// Recorded process identifier.
    pub pid: u32,
    /// When the record was written, if known.
    pub recorded_at: Option<DateTime<Local>>,
}

/// Key-value store holding at most one pid per service.
pub trait PidStore {
    /// Overwrites the slot for `service` with `pid`.
    fn record(&self, service: &str, pid: u32) -> Result<(), PidStoreError>;

    /// Returns the slot content for `service`, if any.
    fn read(&self, service: &str) -> Result<Option<PidRecord>, PidStoreError>;

    /// Removes the slot for `service`. Removing an absent slot succeeds.
    fn clear(&self, service: &str) -> Result<(), PidStoreError>;
}

/// Pid slots stored as files in a state directory.
#[derive(Debug, Clone)]
pub struct FilePidStore {
    dir: PathBuf,
}

impl FilePidStore {
    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the slot for `service`.
    pub fn slot_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.pid"))
    }
}

impl PidStore for FilePidStore {
    fn record(&self, service: &str, pid: u32) -> Result<(), PidStoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| PidStoreError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.slot_path(service);
        fs::write(&path, format!("{pid}\n"))
            .map_err(|source| PidStoreError::Io { path: path.clone(), source })?;
        debug!("Recorded PID {pid} for '{service}' in {}", path.display());
        Ok(())
    }

    fn read(&self, service: &str) -> Result<Option<PidRecord>, PidStoreError> {
        let path = self.slot_path(service);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(PidStoreError::Io { path, source }),
        };

        let pid = match contents.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => pid,
            _ => {
                return Err(PidStoreError::Malformed {
                    service: service.to_string(),
                    content: contents.trim().to_string(),
                });
            }
        };

        let recorded_at = fs::metadata(&path)
            .and_then(|metadata| metadata.modified())
            .ok()
            .map(DateTime::<Local>::from);

        Ok(Some(PidRecord {
            service: service.to_string(),
            pid,
            recorded_at,
        }))
    }

    fn clear(&self, service: &str) -> Result<(), PidStoreError> {
        let path = self.slot_path(service);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Cleared PID slot for '{service}'");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PidStoreError::Io { path, source }),
        }
    }
}

/// In-memory store, used in place of the filesystem in tests.
#[derive(Debug, Default)]
pub struct MemoryPidStore {
    slots: Mutex<HashMap<String, u32>>,
}

impl MemoryPidStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PidStore for MemoryPidStore {
    fn record(&self, service: &str, pid: u32) -> Result<(), PidStoreError> {
        self.slots().insert(service.to_string(), pid);
        Ok(())
    }

    fn read(&self, service: &str) -> Result<Option<PidRecord>, PidStoreError> {
        Ok(self.slots().get(service).map(|pid| PidRecord {
            service: service.to_string(),
            pid: *pid,
            recorded_at: None,
        }))
    }

    fn clear(&self, service: &str) -> Result<(), PidStoreError> {
        self.slots().remove(service);
        Ok(())
    }
}
