//! Tauri side of the shell: the main window, status forwarding and the exit
//! paths that must take the backend down with them.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tauri::{AppHandle, Emitter, Manager, Url, WebviewUrl, WebviewWindowBuilder};
use tauri_plugin_updater::{Update, UpdaterExt};

use crate::backend::{BackendRuntime, BackendStatus, ShellHost, StatusObserver, STATUS_EVENT};
use crate::diagnostics::DiagnosticLog;
use crate::instance::InstanceGuard;
use crate::relay::ReportRelay;
use crate::updates::{UpdateReporter, UpdateState};

pub const MAIN_WINDOW: &str = "main";
const WINDOW_TITLE: &str = "Inet Report Software";

/// Everything the commands need, managed by Tauri once the instance is ours.
pub struct ShellState {
    pub runtime: Arc<BackendRuntime>,
    pub relay: ReportRelay,
    pub download_dir: PathBuf,
}

pub struct TauriHost {
    app: AppHandle,
}

impl TauriHost {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl ShellHost for TauriHost {
    fn open_main_window(&self) -> Result<(), String> {
        WebviewWindowBuilder::new(&self.app, MAIN_WINDOW, WebviewUrl::App("index.html".into()))
            .title(WINDOW_TITLE)
            .inner_size(1000.0, 700.0)
            .min_inner_size(720.0, 520.0)
            .on_navigation(|url| {
                let allowed = is_local_ui(url);
                if !allowed {
                    log::warn!("[Shell] Blocked navigation to {}", url);
                }
                allowed
            })
            .build()
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    fn focus_main_window(&self) {
        if let Some(window) = self.app.get_webview_window(MAIN_WINDOW) {
            show_window(&window);
        }
    }
}

/// Show, restore and focus a window.
fn show_window(window: &tauri::WebviewWindow) {
    let _ = window.show();
    let _ = window.unminimize();
    let _ = window.set_focus();
}

/// The bundled UI is served from `tauri://localhost` or, on Windows,
/// `http(s)://tauri.localhost`.
fn is_local_ui(url: &Url) -> bool {
    match url.scheme() {
        "tauri" => true,
        "http" | "https" => url.host_str() == Some("tauri.localhost"),
        _ => false,
    }
}

/// Forwards every status transition to the main window.
pub struct WindowStatusObserver {
    app: AppHandle,
}

impl WindowStatusObserver {
    pub fn new(app: AppHandle) -> Self {
        Self { app }
    }
}

impl StatusObserver for WindowStatusObserver {
    fn deliver(&self, status: &BackendStatus) {
        if let Err(e) = self.app.emit_to(MAIN_WINDOW, STATUS_EVENT, status.clone()) {
            log::debug!("[Shell] Status not delivered: {}", e);
        }
    }
}

/// Push the current status to a freshly loaded page, through the attached
/// observer so it stays ordered with live transitions.
pub fn push_current_status(app: &AppHandle) {
    if let Some(state) = app.try_state::<ShellState>() {
        let status = state.runtime.channel().resend_last();
        log::debug!("[Shell] Page loaded, resent {:?}", status.status);
    }
}

/// Terminate the backend. Every exit path goes through here.
pub fn stop_backend(app: &AppHandle) {
    if let Some(state) = app.try_state::<ShellState>() {
        state.runtime.shutdown();
    }
}

/// Final teardown: stop the backend and give up the instance lock.
pub fn shutdown(app: &AppHandle) {
    stop_backend(app);
    if let Some(guard) = app.try_state::<Arc<InstanceGuard>>() {
        guard.release();
    }
}

/// An update downloaded this session, installed once the backend is down.
pub struct PendingUpdate {
    log: Arc<DiagnosticLog>,
    slot: Mutex<Option<(Update, Vec<u8>)>>,
}

impl PendingUpdate {
    pub fn new(log: Arc<DiagnosticLog>) -> Self {
        Self {
            log,
            slot: Mutex::new(None),
        }
    }
}

/// Check the feed once, download any newer release, then quit so it can be
/// installed.
pub async fn check_for_updates(app: AppHandle, endpoint: String, pubkey: String, log: Arc<DiagnosticLog>) {
    let mut reporter = UpdateReporter::new(log);
    reporter.report(&UpdateState::Checking);

    let update = match find_update(&app, &endpoint, pubkey).await {
        Ok(Some(update)) => update,
        Ok(None) => {
            reporter.report(&UpdateState::UpToDate);
            return;
        }
        Err(e) => {
            reporter.report(&UpdateState::Failed(e));
            return;
        }
    };
    reporter.report(&UpdateState::Available {
        version: update.version.clone(),
    });

    let bytes = match update.download(|len, total| reporter.chunk(len, total), || {}).await {
        Ok(bytes) => bytes,
        Err(e) => {
            reporter.report(&UpdateState::Failed(e.to_string()));
            return;
        }
    };
    reporter.report(&UpdateState::Downloaded);

    if let Some(pending) = app.try_state::<PendingUpdate>() {
        *pending.slot.lock().unwrap_or_else(|e| e.into_inner()) = Some((update, bytes));
    }
    app.exit(0);
}

async fn find_update(app: &AppHandle, endpoint: &str, pubkey: String) -> Result<Option<Update>, String> {
    let endpoint = Url::parse(endpoint).map_err(|e| e.to_string())?;
    let updater = app
        .updater_builder()
        .pubkey(pubkey)
        .endpoints(vec![endpoint])
        .and_then(|builder| builder.build())
        .map_err(|e| e.to_string())?;

    updater.check().await.map_err(|e| e.to_string())
}

/// Install the pending update, if any, and relaunch. Call after [`shutdown`].
pub fn install_pending_update(app: &AppHandle) {
    let Some(pending) = app.try_state::<PendingUpdate>() else {
        return;
    };
    let Some((update, bytes)) = pending.slot.lock().unwrap_or_else(|e| e.into_inner()).take() else {
        return;
    };

    pending.log.append(&format!("UPDATER: installing {}", update.version));
    match update.install(bytes) {
        Ok(()) => app.restart(),
        Err(e) => pending
            .log
            .append(&UpdateState::Failed(e.to_string()).to_string()),
    }
}

/// Wait for SIGINT/SIGTERM (Ctrl+C on Windows), then exit cleanly.
pub async fn watch_termination_signals(app: AppHandle) {
    termination_signal().await;
    log::info!("[Shell] Termination signal received");
    stop_backend(&app);
    app.exit(0);
}

async fn termination_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
                return;
            }
            Err(e) => log::warn!("[Shell] SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("[Shell] Ctrl+C handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}
