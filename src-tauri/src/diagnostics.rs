//! Durable diagnostics log
//!
//! One append-only file per installation (`inet-report.log` in the data dir).
//! Backend spawn/exit events and every line the backend prints land here so
//! crashes can be diagnosed after the fact.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

/// Timestamped, append-only log file.
///
/// Write failures are swallowed: diagnostics must never take the shell down.
/// Every line is also forwarded to the `log` facade.
pub struct DiagnosticLog {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl DiagnosticLog {
    /// Open (or create) the log file at `path`, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                log::warn!("[Diagnostics] Failed to create {}: {}", parent.display(), e);
            }
        }

        let file = match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => Some(f),
            Err(e) => {
                log::warn!("[Diagnostics] Failed to open {}: {}", path.display(), e);
                None
            }
        };

        Self {
            path,
            file: Mutex::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line: `[<timestamp>] <message>`.
    pub fn append(&self, message: &str) {
        log::info!("{}", message);
        self.write_line(message);
    }

    /// Append a line that should stand out in the console log.
    pub fn append_error(&self, message: &str) {
        log::error!("{}", message);
        self.write_line(message);
    }

    fn write_line(&self, message: &str) {
        let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let mut guard = self.file.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(file) = guard.as_mut() {
            let _ = writeln!(file, "[{}] {}", stamp, message);
            let _ = file.flush();
        }
    }
}
