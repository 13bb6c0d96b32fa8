//! Inet Report desktop shell.
//!
//! Supervises the local report backend and relays file-processing requests
//! to it. The lifecycle core is plain Rust; the Tauri window lives behind the
//! `desktop` feature.

pub mod backend;
pub mod diagnostics;
pub mod error;
pub mod instance;
pub mod relay;
pub mod updates;

#[cfg(feature = "desktop")]
mod commands;
#[cfg(feature = "desktop")]
mod shell;

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use std::sync::Arc;

    use tauri::webview::PageLoadEvent;
    use tauri::{Manager, RunEvent, WindowEvent};

    use crate::backend::config::{backend_executable, get_data_dir, get_lock_path, get_log_path, Settings};
    use crate::backend::{claim_instance, BackendRuntime, LaunchOutcome};
    use crate::diagnostics::DiagnosticLog;
    use crate::instance::InstanceGuard;
    use crate::relay::ReportRelay;
    use crate::shell::{PendingUpdate, ShellState, TauriHost, WindowStatusObserver, MAIN_WINDOW};
    use crate::updates::UpdateState;

    let data_dir = get_data_dir();
    let settings = Settings::load(&data_dir);
    let diag_log = Arc::new(DiagnosticLog::open(get_log_path(&data_dir)));
    let guard = Arc::new(InstanceGuard::new(get_lock_path(&data_dir)));

    diag_log.append(&format!(
        "Shell starting v{} (data dir: {})",
        env!("CARGO_PKG_VERSION"),
        data_dir.display()
    ));

    // Second launch: focus the existing window
    let second_launch = Arc::clone(&guard);

    tauri::Builder::default()
        .plugin(tauri_plugin_single_instance::init(move |_app, _args, _cwd| {
            second_launch.notify_second_launch();
        }))
        .manage(Arc::clone(&guard))
        .setup(move |app| {
            // Logging
            if cfg!(debug_assertions) {
                app.handle().plugin(
                    tauri_plugin_log::Builder::default()
                        .level(log::LevelFilter::Info)
                        .build(),
                )?;
            }

            let host = Arc::new(TauriHost::new(app.handle().clone()));
            if claim_instance(&guard, &host)? == LaunchOutcome::Secondary {
                diag_log.append("Another instance holds the lock, exiting");
                app.handle().exit(0);
                return Ok(());
            }

            let resource_dir = if cfg!(debug_assertions) {
                None
            } else {
                app.path().resource_dir().ok()
            };
            let executable = backend_executable(&settings.backend, resource_dir.as_deref());
            diag_log.append(&format!("Backend executable: {}", executable.display()));

            let runtime = Arc::new(BackendRuntime::from_settings(
                &settings,
                executable,
                Arc::clone(&diag_log),
            ));
            runtime
                .channel()
                .attach(Arc::new(WindowStatusObserver::new(app.handle().clone())));

            app.manage(ShellState {
                runtime: Arc::clone(&runtime),
                relay: ReportRelay::new(&settings.backend.base_url()),
                download_dir: settings.download_dir(&data_dir),
            });

            // Updates (packaged builds only)
            app.manage(PendingUpdate::new(Arc::clone(&diag_log)));
            if cfg!(debug_assertions) {
                log::info!("[Shell] Development build, skipping update check");
            } else if let Some((endpoint, pubkey)) = settings.updater.feed() {
                match app.handle().plugin(tauri_plugin_updater::Builder::new().build()) {
                    Ok(()) => {
                        tauri::async_runtime::spawn(shell::check_for_updates(
                            app.handle().clone(),
                            endpoint.to_string(),
                            pubkey.to_string(),
                            Arc::clone(&diag_log),
                        ));
                    }
                    Err(e) => diag_log.append(&UpdateState::Failed(e.to_string()).to_string()),
                }
            } else {
                log::info!("[Shell] No update feed configured");
            }

            tauri::async_runtime::spawn(shell::watch_termination_signals(app.handle().clone()));
            tauri::async_runtime::spawn(async move {
                if let Err(e) = runtime.bring_up().await {
                    log::warn!("[Shell] Backend unavailable: {}", e);
                }
            });

            Ok(())
        })
        .on_page_load(|webview, payload| {
            if let PageLoadEvent::Finished = payload.event() {
                shell::push_current_status(webview.app_handle());
            }
        })
        .on_window_event(|window, event| {
            if window.label() != MAIN_WINDOW {
                return;
            }

            match event {
                WindowEvent::CloseRequested { .. } | WindowEvent::Destroyed => {
                    log::info!("[Shell] Main window closing, stopping backend");
                    shell::stop_backend(window.app_handle());
                }
                _ => {}
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::backend_request_status,
            commands::backend_restart,
            commands::process_report,
            commands::get_app_version,
            commands::quit_app,
        ])
        .build(tauri::generate_context!())
        .expect("error while building tauri application")
        .run(|app_handle, event| match event {
            RunEvent::ExitRequested { .. } => shell::stop_backend(app_handle),
            RunEvent::Exit => {
                shell::shutdown(app_handle);
                shell::install_pending_update(app_handle);
            }
            _ => {}
        });
}
