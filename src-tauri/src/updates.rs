//! Update state reporting
//!
//! Packaged builds check the update feed once on startup. Every state the
//! check moves through is written to the diagnostics log as an `UPDATER:`
//! line, so a failed or stuck update can be diagnosed after the fact.

use std::fmt;
use std::sync::Arc;

use crate::diagnostics::DiagnosticLog;

/// One state of an update check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateState {
    Checking,
    Available { version: String },
    UpToDate,
    Failed(String),
    /// Download progress, whole percent.
    Progress(u8),
    Downloaded,
}

impl fmt::Display for UpdateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateState::Checking => write!(f, "UPDATER: checking"),
            UpdateState::Available { version } => write!(f, "UPDATER: available {}", version),
            UpdateState::UpToDate => write!(f, "UPDATER: none"),
            UpdateState::Failed(reason) => write!(f, "UPDATER: error {}", reason),
            UpdateState::Progress(percent) => write!(f, "UPDATER: {}%", percent),
            UpdateState::Downloaded => write!(f, "UPDATER: downloaded -> install on exit"),
        }
    }
}

/// Writes update states to the diagnostics log.
///
/// Download progress arrives per chunk; only changes of the whole percentage
/// are logged.
pub struct UpdateReporter {
    log: Arc<DiagnosticLog>,
    received: u64,
    last_percent: Option<u8>,
}

impl UpdateReporter {
    pub fn new(log: Arc<DiagnosticLog>) -> Self {
        Self {
            log,
            received: 0,
            last_percent: None,
        }
    }

    pub fn report(&self, state: &UpdateState) {
        self.log.append(&state.to_string());
    }

    /// Account for `len` more bytes out of `total`. Unknown totals log nothing.
    pub fn chunk(&mut self, len: usize, total: Option<u64>) {
        self.received += len as u64;

        let Some(total) = total.filter(|t| *t > 0) else {
            return;
        };

        let percent = ((self.received as f64 / total as f64) * 100.0).round().min(100.0) as u8;
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            self.report(&UpdateState::Progress(percent));
        }
    }
}
