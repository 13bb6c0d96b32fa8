//! Test harness and fixtures for backend lifecycle and relay tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Multipart, Path as AxumPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tempfile::TempDir;

use inet_report_lib::backend::config::ProbeSettings;
use inet_report_lib::backend::process::BackendCommand;
use inet_report_lib::backend::{BackendRuntime, BackendStatus, StatusKind, StatusObserver};
use inet_report_lib::diagnostics::DiagnosticLog;

/// Body the fake backend returns for a successful `/process/<kind>`.
pub const REPORT_BYTES: &[u8] = b"PK\x03\x04fake-spreadsheet";

/// How the fake backend answers `/process/<kind>`.
#[derive(Debug, Clone, Copy)]
pub enum ProcessBehavior {
    Succeed,
    JsonError,
    TextError,
}

/// One multipart upload as seen by the fake backend.
#[derive(Debug, Clone, Default)]
pub struct Upload {
    pub kind: String,
    pub file_names: Vec<String>,
    pub file_bodies: Vec<Vec<u8>>,
    pub output_name: Option<String>,
}

struct FakeState {
    ping_calls: AtomicU32,
    ready_on: u32,
    behavior: ProcessBehavior,
    uploads: Mutex<Vec<Upload>>,
}

/// In-process stand-in for the report backend.
pub struct FakeBackend {
    pub base_url: String,
    state: Arc<FakeState>,
}

impl FakeBackend {
    /// Serve `/ping` (503 until the `ready_on`-th call) and `/process/:kind`.
    pub async fn start(ready_on: u32, behavior: ProcessBehavior) -> Self {
        let state = Arc::new(FakeState {
            ping_calls: AtomicU32::new(0),
            ready_on,
            behavior,
            uploads: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/ping", get(ping))
            .route("/process/:kind", post(process))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}", addr),
            state,
        }
    }

    pub fn ping_calls(&self) -> u32 {
        self.state.ping_calls.load(Ordering::SeqCst)
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state.uploads.lock().unwrap().clone()
    }
}

async fn ping(State(state): State<Arc<FakeState>>) -> StatusCode {
    let n = state.ping_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if n >= state.ready_on {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn process(
    State(state): State<Arc<FakeState>>,
    AxumPath(kind): AxumPath<String>,
    mut multipart: Multipart,
) -> Response {
    let mut upload = Upload {
        kind,
        ..Upload::default()
    };

    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.unwrap().to_vec();

        match name.as_str() {
            "files" => {
                upload.file_names.push(file_name.unwrap_or_default());
                upload.file_bodies.push(data);
            }
            "output_name" => upload.output_name = Some(String::from_utf8(data).unwrap()),
            _ => {}
        }
    }

    state.uploads.lock().unwrap().push(upload);

    match state.behavior {
        ProcessBehavior::Succeed => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            )],
            REPORT_BYTES,
        )
            .into_response(),
        ProcessBehavior::JsonError => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "No valid rows found",
                "skipped_files": ["empty.csv"],
                "file_errors": [{"file": "empty.csv", "reason": "no header row"}],
            })),
        )
            .into_response(),
        ProcessBehavior::TextError => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// Records every status delivered to it.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<BackendStatus>>,
}

impl Recorder {
    pub fn seen(&self) -> Vec<BackendStatus> {
        self.seen.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<StatusKind> {
        self.seen().iter().map(|s| s.status).collect()
    }

    pub fn count(&self, kind: StatusKind) -> usize {
        self.seen().iter().filter(|s| s.is(kind)).count()
    }

    /// Wait until `count` statuses of `kind` have been delivered.
    pub async fn wait_for(&self, kind: StatusKind, count: usize) -> Vec<BackendStatus> {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                if self.count(kind) >= count {
                    return self.seen();
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("status never delivered")
    }
}

impl StatusObserver for Recorder {
    fn deliver(&self, status: &BackendStatus) {
        self.seen.lock().unwrap().push(status.clone());
    }
}

/// Scratch directory plus a diagnostics log inside it.
pub struct TestHarness {
    pub dir: TempDir,
    pub log: Arc<DiagnosticLog>,
}

impl TestHarness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(DiagnosticLog::open(dir.path().join("inet-report.log")));
        Self { dir, log }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn lock_path(&self) -> PathBuf {
        self.dir.path().join("inet-report.lock")
    }

    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(self.log.path()).unwrap_or_default()
    }

    /// A runtime whose backend is `/bin/sh -c <script>`, probing `base_url`.
    pub fn shell_runtime(&self, script: &str, base_url: &str, max_attempts: u32) -> BackendRuntime {
        let command = BackendCommand::new("/bin/sh").with_args(["-c", script]);
        BackendRuntime::new(command, base_url, fast_probe(max_attempts), Arc::clone(&self.log))
    }

    /// A runtime pointing at an executable that does not exist.
    pub fn missing_runtime(&self, base_url: &str) -> (BackendRuntime, PathBuf) {
        let missing = self.dir.path().join("backend").join("kastle_backend");
        let runtime = BackendRuntime::new(
            BackendCommand::new(&missing),
            base_url,
            fast_probe(60),
            Arc::clone(&self.log),
        );
        (runtime, missing)
    }

    /// Write a scratch input file and return its path.
    pub fn input_file(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }
}

pub fn fast_probe(max_attempts: u32) -> ProbeSettings {
    ProbeSettings {
        max_attempts,
        interval_ms: 10,
        request_timeout_ms: 500,
    }
}

pub fn attach_recorder(runtime: &BackendRuntime) -> Arc<Recorder> {
    let recorder = Arc::new(Recorder::default());
    runtime.channel().attach(recorder.clone());
    recorder
}
