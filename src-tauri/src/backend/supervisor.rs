//! Backend Supervisor
//!
//! Owns the backend child process: spawning it, copying its output into the
//! diagnostics log, watching for its exit and terminating it on shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{oneshot, watch};

use super::process::{group_signal_reaches_descendants, spawn_backend, terminate_tree, BackendCommand};
use super::status::{BackendStatus, StatusChannel};
use crate::diagnostics::DiagnosticLog;
use crate::error::LifecycleError;

/// The live backend process. Present only while the child runs.
struct BackendHandle {
    pid: u32,
    /// Spawn counter value; lets the exit watcher tell its own child apart
    /// from a newer one started after a `stop()`.
    generation: u64,
    /// Dropping or firing this makes the exit watcher kill the child.
    kill: Option<oneshot::Sender<()>>,
    /// Flips to `true` once the child has been reaped.
    exited: watch::Receiver<bool>,
}

type SharedHandle = Arc<Mutex<Option<BackendHandle>>>;

/// Spawns, watches and terminates the backend. At most one child is live.
pub struct ProcessSupervisor {
    command: BackendCommand,
    handle: SharedHandle,
    generation: Arc<AtomicU64>,
    last_exit_code: Arc<Mutex<Option<i32>>>,
    channel: Arc<StatusChannel>,
    log: Arc<DiagnosticLog>,
}

impl ProcessSupervisor {
    pub fn new(command: BackendCommand, channel: Arc<StatusChannel>, log: Arc<DiagnosticLog>) -> Self {
        Self {
            command,
            handle: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            last_exit_code: Arc::new(Mutex::new(None)),
            channel,
            log,
        }
    }

    pub fn command(&self) -> &BackendCommand {
        &self.command
    }

    /// Check if backend is running
    pub fn is_running(&self) -> bool {
        lock(&self.handle).is_some()
    }

    pub fn pid(&self) -> Option<u32> {
        lock(&self.handle).as_ref().map(|h| h.pid)
    }

    /// Exit code of the most recently terminated child. `None` if it was
    /// killed by a signal or nothing has exited yet.
    pub fn last_exit_code(&self) -> Option<i32> {
        *lock(&self.last_exit_code)
    }

    /// Start the backend, returning its PID.
    ///
    /// Already running is not an error: the existing PID is returned and no
    /// second process is spawned.
    pub async fn start(&self) -> Result<u32, LifecycleError> {
        let mut guard = lock(&self.handle);

        if let Some(existing) = guard.as_ref() {
            log::info!("[Backend] Already running (PID: {})", existing.pid);
            return Ok(existing.pid);
        }

        let mut child = spawn_backend(&self.command)?;

        let Some(pid) = child.id() else {
            return Err(LifecycleError::BackendCrashed { code: None });
        };

        self.log.append(&format!("Backend started pid={}", pid));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(copy_lines(stdout, Arc::clone(&self.log), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(copy_lines(stderr, Arc::clone(&self.log), true));
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (kill_tx, kill_rx) = oneshot::channel();
        let (exited_tx, exited_rx) = watch::channel(false);

        *guard = Some(BackendHandle {
            pid,
            generation,
            kill: Some(kill_tx),
            exited: exited_rx,
        });
        drop(guard);

        tokio::spawn(watch_exit(
            child,
            kill_rx,
            ExitContext {
                pid,
                generation,
                latest_generation: Arc::clone(&self.generation),
                exited: exited_tx,
                handle: Arc::clone(&self.handle),
                last_exit_code: Arc::clone(&self.last_exit_code),
                channel: Arc::clone(&self.channel),
                log: Arc::clone(&self.log),
            },
        ));

        Ok(pid)
    }

    /// Terminate the backend and everything it started.
    ///
    /// Never fails and never blocks on the child: termination errors are
    /// logged and the handle is cleared regardless. A no-op when nothing runs.
    /// The exit watcher still publishes the resulting `error` status.
    pub fn stop(&self) {
        self.stop_handle();
    }

    /// Like [`stop`](Self::stop), then wait up to `timeout` for the child to
    /// be reaped so its port is free again.
    pub async fn stop_and_wait(&self, timeout: Duration) {
        let Some(mut exited) = self.stop_handle() else {
            return;
        };

        let reaped = tokio::time::timeout(timeout, async {
            loop {
                if *exited.borrow_and_update() {
                    break;
                }
                if exited.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;

        if reaped.is_err() {
            log::warn!("[Backend] Child not reaped within {:?}", timeout);
        }
    }

    fn stop_handle(&self) -> Option<watch::Receiver<bool>> {
        let Some(mut handle) = lock(&self.handle).take() else {
            log::debug!("[Backend] Not running");
            return None;
        };

        self.log.append(&format!("Stopping backend pid={}", handle.pid));

        if let Err(e) = terminate_tree(handle.pid) {
            log::warn!("[Backend] {}", e);
        }

        if let Some(kill) = handle.kill.take() {
            let _ = kill.send(());
        }

        Some(handle.exited)
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// Copy every non-empty line of a child stream into the diagnostics log.
async fn copy_lines<R>(stream: R, log: Arc<DiagnosticLog>, is_stderr: bool)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end();
        if line.is_empty() {
            continue;
        }

        if !is_stderr {
            log.append(&format!("Backend: {}", line));
        } else if line.contains("ERROR") || line.contains("Traceback") {
            log.append_error(&format!("BackendERR: {}", line));
        } else {
            log.append(&format!("BackendERR: {}", line));
        }
    }
}

struct ExitContext {
    pid: u32,
    generation: u64,
    latest_generation: Arc<AtomicU64>,
    exited: watch::Sender<bool>,
    handle: SharedHandle,
    last_exit_code: Arc<Mutex<Option<i32>>>,
    channel: Arc<StatusChannel>,
    log: Arc<DiagnosticLog>,
}

/// Wait for the child to exit, or kill it when asked to.
///
/// A child that exits on its own has its process group swept, so helpers it
/// spawned cannot keep holding the port. Whatever ends the child, the handle
/// is cleared (unless a newer child has replaced it) before `error` is
/// published, so a `start()` reacting to the status always spawns a fresh
/// process. Once a newer child exists the exit
/// is only logged; its status belongs to the newer child.
async fn watch_exit(mut child: Child, kill_rx: oneshot::Receiver<()>, ctx: ExitContext) {
    let exited = tokio::select! {
        status = child.wait() => Some(status),
        _ = kill_rx => None,
    };

    let status = match exited {
        Some(status) => {
            // The group outlives its leader. Only swept where its id stays
            // reserved after the leader is reaped.
            if group_signal_reaches_descendants() {
                if let Err(e) = terminate_tree(ctx.pid) {
                    log::debug!("[Backend] Nothing left in group {}: {}", ctx.pid, e);
                }
            }
            status
        }
        None => {
            if let Err(e) = child.start_kill() {
                log::debug!("[Backend] start_kill after stop: {}", e);
            }
            child.wait().await
        }
    };

    let code = match status {
        Ok(status) => status.code(),
        Err(e) => {
            log::warn!("[Backend] Failed to collect exit status for PID {}: {}", ctx.pid, e);
            None
        }
    };

    *lock(&ctx.last_exit_code) = code;

    {
        let mut guard = lock(&ctx.handle);
        if guard.as_ref().map(|h| h.generation) == Some(ctx.generation) {
            *guard = None;
        }
    }

    ctx.log
        .append(&format!("Backend exited pid={} code={:?}", ctx.pid, code));

    if ctx.latest_generation.load(Ordering::SeqCst) == ctx.generation {
        let crashed = LifecycleError::BackendCrashed { code };
        ctx.channel.publish(BackendStatus::error(crashed.to_string()));
    }

    // Last, so stop_and_wait() returns only after the exit was reported
    let _ = ctx.exited.send(true);
}
