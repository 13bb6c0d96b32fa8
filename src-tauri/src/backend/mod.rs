//! Backend Management Module
//!
//! Runs the bundled report backend as a child process of the shell: spawn,
//! readiness probing, status reporting and termination on every exit path.

pub mod config;
pub mod health;
pub mod lifecycle;
pub mod process;
pub mod status;
pub mod supervisor;

pub use lifecycle::{claim_instance, launch, BackendRuntime, LaunchOutcome, ShellHost};
pub use status::{BackendStatus, StatusChannel, StatusKind, StatusObserver, STATUS_EVENT};
pub use supervisor::ProcessSupervisor;
