//! Per-service log transcripts.
use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use tracing::debug;

/// Number of log lines surfaced when a service fails to start.
pub const START_FAILURE_TAIL_LINES: usize = 20;

/// Default number of lines shown by `logs`.
pub const DEFAULT_TAIL_LINES: usize = 50;

/// How often a follow checks the file for new output.
const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Append-only log file for one service.
#[derive(Debug, Clone)]
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    /// Creates a sink writing to `path`. Nothing touches the disk until first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Opens the log for appending, creating it and its directory when absent.
    pub fn open_append(&self) -> io::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    /// Returns the last `lines` lines of the log. Bytes that are not UTF-8 are
    /// replaced rather than ending the read.
    pub fn tail(&self, lines: usize) -> io::Result<Vec<String>> {
        let file = self.open_read()?;
        let reader = BufReader::new(file);
        let mut buffer: VecDeque<String> = VecDeque::with_capacity(lines.min(1024));

        if lines == 0 {
            return Ok(Vec::new());
        }

        for line in reader.split(b'\n') {
            let mut line = line?;
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if buffer.len() == lines {
                buffer.pop_front();
            }
            buffer.push_back(String::from_utf8_lossy(&line).into_owned());
        }

        Ok(buffer.into_iter().collect())
    }

    /// Writes the last `lines` lines, then streams new output until `cancel` is set.
    pub fn follow<W: Write>(
        &self,
        out: &mut W,
        lines: usize,
        cancel: &AtomicBool,
    ) -> io::Result<()> {
        for line in self.tail(lines)? {
            writeln!(out, "{line}")?;
        }
        out.flush()?;

        let mut file = self.open_read()?;
        let mut offset = file.seek(SeekFrom::End(0))?;
        let mut chunk = Vec::new();

        while !cancel.load(Ordering::SeqCst) {
            let len = match fs::metadata(&self.path) {
                Ok(metadata) => metadata.len(),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    // Removed while following; pick up the next incarnation.
                    file = self.open_read()?;
                    offset = 0;
                    0
                }
                Err(err) => return Err(err),
            };

            if len < offset {
                debug!("Log {} shrank; restarting from the beginning", self.path.display());
                file = self.open_read()?;
                offset = 0;
            }

            if len > offset {
                file.seek(SeekFrom::Start(offset))?;
                chunk.clear();
                let read = (&mut file).take(len - offset).read_to_end(&mut chunk)?;
                offset += read as u64;
                out.write_all(&chunk)?;
                out.flush()?;
            }

            thread::sleep(FOLLOW_POLL_INTERVAL);
        }

        Ok(())
    }

    fn open_read(&self) -> io::Result<File> {
        if !self.path.exists() {
            self.open_append()?;
        }
        File::open(&self.path)
    }
}
