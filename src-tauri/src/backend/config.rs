//! Backend Configuration
//!
//! Handles settings, data directory and backend executable path resolution.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Application identifier, also the data directory name.
pub const APP_IDENTIFIER: &str = "com.inet.report";

/// Overrides the backend executable path.
pub const BACKEND_EXE_ENV: &str = "INET_BACKEND_EXE";
/// Overrides the backend port.
pub const BACKEND_PORT_ENV: &str = "INET_BACKEND_PORT";

pub const LOG_FILE_NAME: &str = "inet-report.log";
pub const LOCK_FILE_NAME: &str = "inet-report.lock";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[cfg(target_os = "windows")]
pub const BACKEND_EXE_NAME: &str = "kastle_backend.exe";
#[cfg(not(target_os = "windows"))]
pub const BACKEND_EXE_NAME: &str = "kastle_backend";

/// Where and how the backend is launched.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    /// Explicit executable path; resolved from the install layout when unset.
    pub executable: Option<PathBuf>,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            executable: None,
            args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl BackendSettings {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Readiness polling parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    pub max_attempts: u32,
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        // 60 x 250ms, roughly 15s worst case
        Self {
            max_attempts: 60,
            interval_ms: 250,
            request_timeout_ms: 1000,
        }
    }
}

impl ProbeSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub directory: Option<PathBuf>,
}

/// Update feed. Packaged builds check it on startup when both are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterSettings {
    /// Tauri updater manifest URL.
    pub endpoint: Option<String>,
    /// Minisign public key the update artifacts are signed with.
    pub pubkey: Option<String>,
}

impl UpdaterSettings {
    /// `(endpoint, pubkey)` when the feed is fully configured.
    pub fn feed(&self) -> Option<(&str, &str)> {
        match (self.endpoint.as_deref(), self.pubkey.as_deref()) {
            (Some(endpoint), Some(pubkey)) if !endpoint.is_empty() && !pubkey.is_empty() => {
                Some((endpoint, pubkey))
            }
            _ => None,
        }
    }
}

/// Settings file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub backend: BackendSettings,
    pub probe: ProbeSettings,
    pub downloads: DownloadSettings,
    pub updater: UpdaterSettings,
}

impl Settings {
    /// Load `settings.json` from `data_dir`, then apply environment overrides.
    ///
    /// A missing or unreadable file yields the defaults.
    pub fn load(data_dir: &Path) -> Self {
        let mut settings = Self::load_file(&data_dir.join(SETTINGS_FILE_NAME));
        settings.apply_env();
        settings
    }

    fn load_file(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Settings>(&content) {
                Ok(settings) => return settings,
                Err(e) => log::warn!("[Config] Failed to parse settings: {}", e),
            },
            Err(e) => log::warn!("[Config] Failed to read settings: {}", e),
        }

        Self::default()
    }

    fn apply_env(&mut self) {
        if let Some(exe) = env::var_os(BACKEND_EXE_ENV) {
            self.backend.executable = Some(PathBuf::from(exe));
        }

        if let Ok(port) = env::var(BACKEND_PORT_ENV) {
            match port.trim().parse::<u16>() {
                Ok(port) => self.backend.port = port,
                Err(_) => log::warn!("[Config] Ignoring invalid {}={}", BACKEND_PORT_ENV, port),
            }
        }
    }

    /// Directory generated reports are saved into.
    pub fn download_dir(&self, data_dir: &Path) -> PathBuf {
        self.downloads
            .directory
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| data_dir.join("downloads"))
    }
}

/// Get the per-installation data directory.
pub fn get_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(APP_IDENTIFIER))
        .or_else(|| dirs::home_dir().map(|h| h.join(".inet-report")))
        .unwrap_or_else(|| PathBuf::from(".inet-report"))
}

pub fn get_log_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOG_FILE_NAME)
}

pub fn get_lock_path(data_dir: &Path) -> PathBuf {
    data_dir.join(LOCK_FILE_NAME)
}

/// Resolve the backend executable.
///
/// An explicit setting wins. Packaged builds pass their resource directory and
/// find the backend under `backend/`; development builds look in
/// `backend/dist/` under the working directory.
pub fn backend_executable(settings: &BackendSettings, resource_dir: Option<&Path>) -> PathBuf {
    if let Some(exe) = &settings.executable {
        return exe.clone();
    }

    match resource_dir {
        Some(dir) => dir.join("backend").join(BACKEND_EXE_NAME),
        None => env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("backend")
            .join("dist")
            .join(BACKEND_EXE_NAME),
    }
}
