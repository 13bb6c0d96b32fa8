//! Error types for the backend lifecycle and the report relay.

use std::path::PathBuf;

use thiserror::Error;

/// Failures of the backend lifecycle.
///
/// All of these end the current backend instance, never the shell. They reach
/// the user through the `error` status and its detail text.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("Backend executable not found: {}", .path.display())]
    ExecutableNotFound { path: PathBuf },

    #[error("Failed to spawn backend {}: {source}", .path.display())]
    Spawn {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend did not respond on /ping after {attempts} attempts")]
    ProbeTimeout { attempts: u32 },

    #[error("Backend exited ({})", describe_exit(.code))]
    BackendCrashed { code: Option<i32> },

    /// Logged and swallowed; shutdown never waits on this.
    #[error("Failed to terminate backend (PID {pid}): {reason}")]
    TerminationFailure { pid: u32, reason: String },

    #[error("Failed to open main window: {0}")]
    Window(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match *code {
        Some(code) => format!("code {}", code),
        None => "terminated by signal".to_string(),
    }
}

/// Failures of a `/process/<report-type>` round trip.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Please add at least one file.")]
    NoFiles,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to reach backend: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-200 status. `message` is already
    /// rendered for display.
    #[error("{message}")]
    Backend { status: u16, message: String },
}

impl RelayError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        RelayError::Io {
            context: context.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crash_detail_mentions_exit_code() {
        let err = LifecycleError::BackendCrashed { code: Some(1) };
        assert_eq!(err.to_string(), "Backend exited (code 1)");

        let err = LifecycleError::BackendCrashed { code: None };
        assert_eq!(err.to_string(), "Backend exited (terminated by signal)");
    }

    #[test]
    fn missing_executable_detail_contains_path() {
        let err = LifecycleError::ExecutableNotFound {
            path: PathBuf::from("/opt/inet/backend/kastle_backend"),
        };
        assert!(err.to_string().contains("/opt/inet/backend/kastle_backend"));
    }
}
