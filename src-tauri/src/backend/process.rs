//! Backend Process Management
//!
//! Spawning the backend executable and terminating it together with
//! everything it started.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tokio::process::{Child, Command as TokioCommand};

use crate::error::LifecycleError;

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// The program and arguments used to launch the backend.
#[derive(Debug, Clone)]
pub struct BackendCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl BackendCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// The backend runs from its own directory.
    pub fn working_dir(&self) -> PathBuf {
        self.program
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// Spawn the backend process.
///
/// No shell is involved. stdout/stderr are piped so the caller can copy them
/// into the diagnostics log. On Unix the child leads its own process group so
/// the whole group can be signalled on shutdown.
pub fn spawn_backend(command: &BackendCommand) -> Result<Child, LifecycleError> {
    if !command.program.is_file() {
        return Err(LifecycleError::ExecutableNotFound {
            path: command.program.clone(),
        });
    }

    let cwd = command.working_dir();
    log::info!("[Backend] Executable: {}", command.program.display());
    log::info!("[Backend] Working directory: {}", cwd.display());

    let mut cmd = TokioCommand::new(&command.program);
    cmd.args(&command.args)
        .current_dir(&cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        cmd.process_group(0);
    }

    #[cfg(target_os = "windows")]
    {
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    cmd.spawn().map_err(|source| LifecycleError::Spawn {
        path: command.program.clone(),
        source,
    })
}

/// Whether one signal sent to the child's process group also reaches every
/// process the child started.
///
/// True on Unix, where the child leads its own group. Windows has no such
/// delivery, so the tree has to be enumerated and killed explicitly.
pub const fn group_signal_reaches_descendants() -> bool {
    cfg!(unix)
}

/// Terminate the backend and all of its descendants.
pub fn terminate_tree(pid: u32) -> Result<(), LifecycleError> {
    if group_signal_reaches_descendants() {
        kill_process_group(pid)
    } else {
        kill_process_tree(pid)
    }
}

/// SIGKILL the process group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: u32) -> Result<(), LifecycleError> {
    run_kill_command(pid, Command::new("kill").args(["-KILL", "--", &format!("-{}", pid)]))
}

#[cfg(not(unix))]
fn kill_process_group(pid: u32) -> Result<(), LifecycleError> {
    kill_process_tree(pid)
}

/// `taskkill /T` walks the child tree.
#[cfg(target_os = "windows")]
fn kill_process_tree(pid: u32) -> Result<(), LifecycleError> {
    use std::os::windows::process::CommandExt;

    run_kill_command(
        pid,
        Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .creation_flags(CREATE_NO_WINDOW),
    )
}

#[cfg(not(target_os = "windows"))]
fn kill_process_tree(pid: u32) -> Result<(), LifecycleError> {
    kill_process_group(pid)
}

fn run_kill_command(pid: u32, cmd: &mut Command) -> Result<(), LifecycleError> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| LifecycleError::TerminationFailure {
            pid,
            reason: e.to_string(),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(LifecycleError::TerminationFailure {
            pid,
            reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
