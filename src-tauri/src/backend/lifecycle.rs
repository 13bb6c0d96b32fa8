//! Backend Lifecycle
//!
//! Strings the pieces together: claim the single instance, open the window,
//! start the backend, wait for it and publish the verdict.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use super::config::{ProbeSettings, Settings};
use super::health::HealthProbe;
use super::process::BackendCommand;
use super::status::{BackendStatus, StatusChannel};
use super::supervisor::ProcessSupervisor;
use crate::diagnostics::DiagnosticLog;
use crate::error::LifecycleError;
use crate::instance::InstanceGuard;

/// How long a restart waits for the old backend to release its port.
const RESTART_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// The UI side of the shell, as seen by the launcher.
pub trait ShellHost: Send + Sync + 'static {
    /// Create the main window.
    fn open_main_window(&self) -> Result<(), String>;

    /// Restore, show and focus the existing main window.
    fn focus_main_window(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// This process owns the machine-wide instance and runs the backend.
    Primary,
    /// Another instance is running; this process must exit without doing
    /// anything else.
    Secondary,
}

/// Acquire the single-instance lock and, on success, open the main window.
///
/// On failure nothing is created: no window, no backend.
pub fn claim_instance<H: ShellHost>(
    guard: &InstanceGuard,
    host: &Arc<H>,
) -> Result<LaunchOutcome, LifecycleError> {
    if !guard.acquire() {
        log::info!("[Shell] Another instance is running, exiting");
        return Ok(LaunchOutcome::Secondary);
    }

    let focus_target = Arc::clone(host);
    guard.on_second_launch(move || focus_target.focus_main_window());

    host.open_main_window().map_err(LifecycleError::Window)?;
    Ok(LaunchOutcome::Primary)
}

/// The backend side of the shell: status register, supervisor and probe.
pub struct BackendRuntime {
    channel: Arc<StatusChannel>,
    supervisor: ProcessSupervisor,
    probe: HealthProbe,
    probe_settings: ProbeSettings,
    log: Arc<DiagnosticLog>,
}

impl BackendRuntime {
    pub fn new(
        command: BackendCommand,
        base_url: &str,
        probe_settings: ProbeSettings,
        log: Arc<DiagnosticLog>,
    ) -> Self {
        let channel = Arc::new(StatusChannel::new());
        let supervisor = ProcessSupervisor::new(command, Arc::clone(&channel), Arc::clone(&log));
        let probe = HealthProbe::new(base_url, probe_settings.request_timeout(), Arc::clone(&channel));

        Self {
            channel,
            supervisor,
            probe,
            probe_settings,
            log,
        }
    }

    /// Build the runtime from settings and a resolved executable path.
    pub fn from_settings(settings: &Settings, executable: PathBuf, log: Arc<DiagnosticLog>) -> Self {
        let command = BackendCommand::new(executable).with_args(settings.backend.args.clone());
        Self::new(
            command,
            &settings.backend.base_url(),
            settings.probe.clone(),
            log,
        )
    }

    pub fn channel(&self) -> &Arc<StatusChannel> {
        &self.channel
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Start the backend and wait for it to become ready.
    ///
    /// Publishes `starting`, then one `checking` per probe attempt, then
    /// exactly one of `ready` or `error`. The error is also returned.
    pub async fn bring_up(&self) -> Result<(), LifecycleError> {
        self.channel.publish(BackendStatus::starting());

        if let Err(e) = self.supervisor.start().await {
            self.log.append_error(&format!("Backend start error: {}", e));
            self.channel.publish(BackendStatus::error(e.to_string()));
            return Err(e);
        }

        let attempts = self.probe_settings.max_attempts;
        let ready = self
            .probe
            .wait_until_ready(attempts, self.probe_settings.interval())
            .await;
        self.log.append(&format!("Backend ready={}", ready));

        if ready {
            self.channel.publish(BackendStatus::ready());
            Ok(())
        } else {
            let e = LifecycleError::ProbeTimeout { attempts };
            self.channel.publish(BackendStatus::error(e.to_string()));
            Err(e)
        }
    }

    /// Stop the current backend, wait for it to go away, and bring up a new one.
    pub async fn restart(&self) -> Result<(), LifecycleError> {
        self.log.append("Backend restart requested");
        self.supervisor.stop_and_wait(RESTART_REAP_TIMEOUT).await;
        self.bring_up().await
    }

    /// Terminate the backend. Safe to call from every exit path, repeatedly.
    pub fn shutdown(&self) {
        self.supervisor.stop();
    }
}

/// Full launch: claim the instance, then bring the backend up.
///
/// Backend failures are already visible through the status channel, so only
/// the launch outcome is returned.
pub async fn launch<H: ShellHost>(
    guard: &InstanceGuard,
    host: &Arc<H>,
    runtime: &BackendRuntime,
) -> Result<LaunchOutcome, LifecycleError> {
    let outcome = claim_instance(guard, host)?;

    if outcome == LaunchOutcome::Primary {
        if let Err(e) = runtime.bring_up().await {
            log::warn!("[Shell] Backend unavailable: {}", e);
        }
    }

    Ok(outcome)
}
