//! Tracing subscriber configuration and per-node log files.
//!
//! Log levels follow these conventions:
//! - ERROR: Unrecoverable failures, construction aborts
//! - WARN: Recoverable errors, unexpected but handled conditions
//! - INFO: Lifecycle events (node started, network joined, port changed)
//! - DEBUG: State transitions, configuration applies, maintenance decisions
//! - TRACE: Engine trace messages, state object I/O

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use crate::store::atomic_write;

/// Initialize the tracing subscriber with sensible defaults.
///
/// Log level can be controlled via the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Initialize the tracing subscriber with JSON output.
///
/// Useful for structured logging when the node runs under a supervisor.
pub fn init_json() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .init();
}

/// Initialize the tracing subscriber for tests.
///
/// Uses `try_init` to avoid panicking if called multiple times.
pub fn init_for_tests() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// An append-only text log with size-bounded trimming.
pub struct LogFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFile {
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[<unix seconds>.<millis>] <msg>`.
    pub fn write_line(&self, msg: &str) -> io::Result<()> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let line = format!("[{}.{:03}] {}\n", now.as_secs(), now.subsec_millis(), msg);
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())
    }

    /// Current size in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Shrink the file once it exceeds `limit` bytes.
    ///
    /// Keeps the trailing `limit * keep_fraction` bytes; with `at_newline` the
    /// kept part starts after the next line break so no partial line remains.
    /// Returns whether the file was trimmed.
    pub fn trim(&self, limit: u64, keep_fraction: f64, at_newline: bool) -> io::Result<bool> {
        let mut file = self.file.lock();
        let len = file.metadata()?.len();
        if len <= limit {
            return Ok(false);
        }

        let contents = std::fs::read(&self.path)?;
        let keep = ((limit as f64) * keep_fraction.clamp(0.0, 1.0)) as usize;
        let mut start = contents.len().saturating_sub(keep);
        if at_newline {
            start = match contents[start..].iter().position(|b| *b == b'\n') {
                Some(offset) => start + offset + 1,
                None => contents.len(),
            };
        }

        atomic_write(&self.path, &contents[start..], false)?;
        *file = open_append(&self.path)?;
        Ok(true)
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// The `info.log` and `error.log` sinks of a node.
///
/// Messages are always emitted as tracing events; they are also appended to
/// the files when file logging is enabled.
#[derive(Default)]
pub struct NodeLog {
    info: Option<LogFile>,
    error: Option<LogFile>,
}

impl NodeLog {
    /// Open both files under `base`, or none when `enabled` is false.
    pub fn open(base: &Path, enabled: bool) -> io::Result<Self> {
        if !enabled {
            return Ok(Self::default());
        }
        Ok(Self {
            info: Some(LogFile::open(base.join("info.log"))?),
            error: Some(LogFile::open(base.join("error.log"))?),
        })
    }

    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
        write_to(self.info.as_ref(), msg);
    }

    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
        write_to(self.error.as_ref(), msg);
    }

    /// Engine trace output goes to the info log with a `TRACE:` prefix.
    pub fn trace(&self, msg: &str) {
        tracing::trace!(target: "switchyard::engine", "{msg}");
        write_to(self.info.as_ref(), &format!("TRACE: {msg}"));
    }

    pub fn info_file(&self) -> Option<&LogFile> {
        self.info.as_ref()
    }

    pub fn error_file(&self) -> Option<&LogFile> {
        self.error.as_ref()
    }

    /// Trim the info log to `limit` bytes, keeping the newer half.
    pub fn trim_info(&self, limit: u64) {
        let Some(info) = self.info.as_ref() else {
            return;
        };
        if let Err(e) = info.trim(limit, 0.5, true) {
            tracing::warn!(path = %info.path().display(), "unable to trim log: {e}");
        }
    }
}

fn write_to(file: Option<&LogFile>, msg: &str) {
    if let Some(file) = file
        && let Err(e) = file.write_line(msg)
    {
        tracing::debug!(path = %file.path().display(), "log write failed: {e}");
    }
}
