//! Backend status register
//!
//! Holds the last known lifecycle state of the backend and pushes every
//! transition to the attached observer (the UI). Late subscribers pull the
//! register with [`StatusChannel::last`] instead of waiting for the next push.

use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

/// Name of the event carrying a [`BackendStatus`] to the UI.
pub const STATUS_EVENT: &str = "backend:status";

/// The lifecycle state of the backend as observed by the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusKind {
    Starting,
    Checking,
    Ready,
    Error,
}

/// Immutable status snapshot, serialized as `{"status": ..., "detail": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendStatus {
    pub status: StatusKind,
    pub detail: String,
}

impl BackendStatus {
    pub fn new(status: StatusKind, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn starting() -> Self {
        Self::new(StatusKind::Starting, "Launching backend…")
    }

    /// `attempt` is 1-based.
    pub fn checking(attempt: u32, max_attempts: u32) -> Self {
        Self::new(
            StatusKind::Checking,
            format!("Attempt {}/{}", attempt, max_attempts),
        )
    }

    pub fn ready() -> Self {
        Self::new(StatusKind::Ready, "Backend online")
    }

    pub fn error(detail: impl Into<String>) -> Self {
        Self::new(StatusKind::Error, detail)
    }

    pub fn is(&self, kind: StatusKind) -> bool {
        self.status == kind
    }
}

/// Receives status transitions pushed through a [`StatusChannel`].
pub trait StatusObserver: Send + Sync {
    fn deliver(&self, status: &BackendStatus);
}

impl<F> StatusObserver for F
where
    F: Fn(&BackendStatus) + Send + Sync,
{
    fn deliver(&self, status: &BackendStatus) {
        self(status)
    }
}

/// Single most-recent-status register plus at most one attached observer.
///
/// Publishes are serialized, so the observer sees transitions in exactly the
/// order they were published. The register is updated before delivery, so an
/// observer calling [`StatusChannel::last`] sees the status being delivered.
pub struct StatusChannel {
    last: RwLock<BackendStatus>,
    observer: Mutex<Option<Arc<dyn StatusObserver>>>,
    delivery: Mutex<()>,
}

impl StatusChannel {
    /// Create the register, initialized to `starting`.
    pub fn new() -> Self {
        Self {
            last: RwLock::new(BackendStatus::starting()),
            observer: Mutex::new(None),
            delivery: Mutex::new(()),
        }
    }

    /// Replace the register and deliver to the attached observer, if any.
    pub fn publish(&self, status: BackendStatus) {
        let _order = self.delivery.lock().unwrap_or_else(|e| e.into_inner());

        log::debug!("[Status] {:?}: {}", status.status, status.detail);
        *self.last.write().unwrap_or_else(|e| e.into_inner()) = status.clone();

        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.deliver(&status);
        }
    }

    /// Deliver the current register to the attached observer again.
    ///
    /// Ordered with [`StatusChannel::publish`]: the register is read only once
    /// any in-flight delivery has finished, so a newer status can never be
    /// overtaken by this one. Must not be called from inside an observer.
    pub fn resend_last(&self) -> BackendStatus {
        let _order = self.delivery.lock().unwrap_or_else(|e| e.into_inner());

        let status = self.last();
        let observer = self
            .observer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(observer) = observer {
            observer.deliver(&status);
        }
        status
    }

    /// Attach `observer`, replacing any previous one. Nothing is replayed.
    pub fn attach(&self, observer: Arc<dyn StatusObserver>) {
        *self.observer.lock().unwrap_or_else(|e| e.into_inner()) = Some(observer);
    }

    pub fn detach(&self) {
        *self.observer.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// The last published status.
    pub fn last(&self) -> BackendStatus {
        self.last.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for StatusChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer that records every delivery; used by tests across the crate.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingObserver {
    seen: Mutex<Vec<BackendStatus>>,
}

#[cfg(test)]
impl RecordingObserver {
    pub(crate) fn seen(&self) -> Vec<BackendStatus> {
        self.seen.lock().unwrap().clone()
    }
}

#[cfg(test)]
impl StatusObserver for RecordingObserver {
    fn deliver(&self, status: &BackendStatus) {
        self.seen.lock().unwrap().push(status.clone());
    }
}
