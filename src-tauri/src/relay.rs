//! Report relay
//!
//! Sends the user's files to the backend's `/process/<report-type>` endpoint
//! as multipart form data and hands back the generated spreadsheet.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// Which report the backend should build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Attendance,
    Quick,
}

impl ReportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportType::Attendance => "attendance",
            ReportType::Quick => "quick",
        }
    }

    pub fn endpoint_path(&self) -> String {
        format!("/process/{}", self.as_str())
    }

    pub fn default_output_name(&self) -> &'static str {
        match self {
            ReportType::Attendance => "Attendance_Output.xlsx",
            ReportType::Quick => "Quick_Custom_Output.xlsx",
        }
    }
}

impl fmt::Display for ReportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "attendance" => Ok(ReportType::Attendance),
            "quick" => Ok(ReportType::Quick),
            other => Err(format!("Invalid report type: {}", other)),
        }
    }
}

/// A spreadsheet returned by the backend.
#[derive(Debug, Clone)]
pub struct ProcessedReport {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// JSON error body the backend sends on failure. Every field is optional.
#[derive(Debug, Default, Deserialize)]
struct BackendErrorBody {
    error: Option<String>,
    #[serde(default)]
    skipped_files: Vec<String>,
    #[serde(default)]
    file_errors: Vec<serde_json::Value>,
}

pub struct ReportRelay {
    base_url: String,
    client: reqwest::Client,
}

impl ReportRelay {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self, report_type: ReportType) -> String {
        format!("{}{}", self.base_url, report_type.endpoint_path())
    }

    /// Upload `files` and return the generated report.
    pub async fn process(
        &self,
        report_type: ReportType,
        files: &[PathBuf],
        output_name: Option<&str>,
    ) -> Result<ProcessedReport, RelayError> {
        if files.is_empty() {
            return Err(RelayError::NoFiles);
        }

        let file_name = normalize_output_name(report_type, output_name);
        let mut form = Form::new();

        for path in files {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|e| RelayError::io(format!("Failed to read {}", path.display()), e))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            form = form.part("files", Part::bytes(bytes).file_name(name));
        }
        form = form.text("output_name", file_name.clone());

        let url = self.endpoint(report_type);
        log::info!("[Relay] POST {} ({} file(s))", url, files.len());

        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();

        if !status.is_success() {
            let is_json = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.to_ascii_lowercase().contains("application/json"))
                .unwrap_or(false);
            let body = response.text().await.unwrap_or_default();
            let message = render_backend_error(status, is_json, &body);
            log::warn!("[Relay] {} failed with {}: {}", url, status, message);
            return Err(RelayError::Backend {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response.bytes().await?.to_vec();
        log::info!("[Relay] Received {} ({} bytes)", file_name, bytes.len());

        Ok(ProcessedReport { file_name, bytes })
    }
}

/// Turn a failed response into the text shown to the user.
fn render_backend_error(status: StatusCode, is_json: bool, body: &str) -> String {
    let fallback = format!("Server error ({})", status.as_u16());

    if !is_json {
        let text = body.trim();
        return if text.is_empty() { fallback } else { text.to_string() };
    }

    let parsed: BackendErrorBody = serde_json::from_str(body).unwrap_or_default();
    let mut message = parsed
        .error
        .filter(|e| !e.is_empty())
        .unwrap_or(fallback);

    if !parsed.skipped_files.is_empty() {
        message.push_str(&format!("\nSkipped: {}", parsed.skipped_files.join(", ")));
    }

    if let Some(first) = parsed.file_errors.first() {
        let details = serde_json::to_string_pretty(first).unwrap_or_else(|_| first.to_string());
        message.push_str(&format!("\n\nDetails:\n{}", details));
    }

    message
}

/// Reduce a user-supplied name to a bare spreadsheet file name.
///
/// Directories are stripped, blanks fall back to the report default and
/// `.xlsx` is appended unless the name already ends in `.xlsx` or `.xls`.
pub fn normalize_output_name(report_type: ReportType, requested: Option<&str>) -> String {
    let bare = requested
        .map(|name| name.trim())
        .and_then(|name| name.rsplit(|c: char| c == '/' || c == '\\').next())
        .map(str::trim)
        .unwrap_or("");

    if bare.is_empty() || bare == "." || bare == ".." {
        return report_type.default_output_name().to_string();
    }

    let lower = bare.to_ascii_lowercase();
    if lower.ends_with(".xlsx") || lower.ends_with(".xls") {
        bare.to_string()
    } else {
        format!("{}.xlsx", bare)
    }
}

/// Write `report` into `dir` without overwriting anything already there.
///
/// Clashing names get a ` (n)` suffix before the extension.
pub async fn save_report(report: &ProcessedReport, dir: &Path) -> Result<PathBuf, RelayError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RelayError::io(format!("Failed to create {}", dir.display()), e))?;

    let target = unique_path(dir, &report.file_name);
    tokio::fs::write(&target, &report.bytes)
        .await
        .map_err(|e| RelayError::io(format!("Failed to write {}", target.display()), e))?;

    log::info!("[Relay] Saved {}", target.display());
    Ok(target)
}

fn unique_path(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let name = Path::new(file_name);
    let stem = name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = name
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1u32..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}
