//! Tauri Commands
//!
//! Exposes backend status and the report relay to the frontend.

use std::path::PathBuf;
use std::sync::Arc;

use tauri::{AppHandle, State};

use crate::backend::BackendStatus;
use crate::relay::{save_report, ReportType};
use crate::shell::ShellState;

/// Current backend status, for pages that missed the pushes.
#[tauri::command]
pub fn backend_request_status(state: State<'_, ShellState>) -> BackendStatus {
    state.runtime.channel().last()
}

/// Stop the backend and bring it up again
#[tauri::command]
pub async fn backend_restart(state: State<'_, ShellState>) -> Result<(), String> {
    let runtime = Arc::clone(&state.runtime);
    runtime.restart().await.map_err(|e| e.to_string())
}

/// Send files to the backend and save the resulting spreadsheet.
///
/// Returns the path the report was saved to.
#[tauri::command]
pub async fn process_report(
    state: State<'_, ShellState>,
    report_type: ReportType,
    paths: Vec<PathBuf>,
    output_name: Option<String>,
) -> Result<String, String> {
    let report = state
        .relay
        .process(report_type, &paths, output_name.as_deref())
        .await
        .map_err(|e| e.to_string())?;

    let saved = save_report(&report, &state.download_dir)
        .await
        .map_err(|e| e.to_string())?;

    Ok(saved.to_string_lossy().to_string())
}

/// Get app version
#[tauri::command]
pub fn get_app_version(app: AppHandle) -> String {
    app.config().version.clone().unwrap_or_else(|| "0.0.0".to_string())
}

/// Quit the application
#[tauri::command]
pub fn quit_app(app: AppHandle, state: State<'_, ShellState>) {
    state.runtime.shutdown();
    app.exit(0);
}
