//! Worker process management.
//!
//! [`WorkerProcess`] owns one spawned `sandframe-worker` process for exactly
//! one request. It tracks the lifecycle in a [`WorkerState`] and guarantees
//! the process is reaped exactly once, on drop if nothing else did it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::WORKER_PATH_ENV;
use crate::error::{Error, Result};

/// File name of the worker binary.
pub const WORKER_BINARY: &str = if cfg!(windows) {
    "sandframe-worker.exe"
} else {
    "sandframe-worker"
};

/// Log filter forwarded into the otherwise empty worker environment.
pub const WORKER_LOG_ENV: &str = "SANDFRAME_LOG";

const POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Lifecycle of a worker process.
///
/// `Spawned -> Running -> {Completed | TimedOut | Crashed} -> Reaped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// The process exists; inputs have not been handed over.
    Spawned,
    /// Inputs are being delivered or the script is executing.
    Running,
    /// A well-formed response arrived.
    Completed,
    /// The deadline elapsed first and the process was killed.
    TimedOut,
    /// The process ended without a usable response.
    Crashed,
    /// The process has been waited on; its OS resources are released.
    Reaped,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkerState::Completed | WorkerState::TimedOut | WorkerState::Crashed
        )
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WorkerState::Spawned => "spawned",
            WorkerState::Running => "running",
            WorkerState::Completed => "completed",
            WorkerState::TimedOut => "timed out",
            WorkerState::Crashed => "crashed",
            WorkerState::Reaped => "reaped",
        })
    }
}

/// Handle to one worker process.
pub struct WorkerProcess {
    child: Child,
    pid: u32,
    state: WorkerState,
    /// The terminal state recorded before reaping.
    outcome: Option<WorkerState>,
    exit_status: Option<ExitStatus>,
}

impl WorkerProcess {
    /// Spawn the worker at `path` with a cleared environment.
    ///
    /// Only [`WORKER_LOG_ENV`] is passed through. The working directory is
    /// the system temp dir.
    pub fn spawn(path: &Path, forward_logs: bool) -> Result<Self> {
        let mut command = Command::new(path);
        command
            .env_clear()
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(if forward_logs {
                Stdio::inherit()
            } else {
                Stdio::null()
            });
        if let Ok(filter) = std::env::var(WORKER_LOG_ENV) {
            command.env(WORKER_LOG_ENV, filter);
        }

        let child = command.spawn().map_err(|e| {
            Error::Ipc(format!(
                "failed to spawn worker process '{}': {}",
                path.display(),
                e
            ))
        })?;
        let pid = child.id();
        tracing::debug!(pid, path = %path.display(), "spawned worker");
        Ok(Self {
            child,
            pid,
            state: WorkerState::Spawned,
            outcome: None,
            exit_status: None,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// The terminal state the worker reached, also after reaping.
    pub fn outcome(&self) -> Option<WorkerState> {
        self.outcome
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Take the worker's pipes. Moves the handle to `Running`.
    pub fn take_io(&mut self) -> Result<(ChildStdin, ChildStdout)> {
        let stdin = self
            .child
            .stdin
            .take()
            .ok_or_else(|| Error::Ipc("worker stdin already taken".to_string()))?;
        let stdout = self
            .child
            .stdout
            .take()
            .ok_or_else(|| Error::Ipc("worker stdout already taken".to_string()))?;
        if self.state == WorkerState::Spawned {
            self.state = WorkerState::Running;
        }
        Ok((stdin, stdout))
    }

    /// Record a terminal state. The first one recorded sticks.
    pub fn finish(&mut self, outcome: WorkerState) {
        debug_assert!(outcome.is_terminal());
        if self.outcome.is_none() {
            self.outcome = Some(outcome);
            if self.state != WorkerState::Reaped {
                self.state = outcome;
            }
        }
    }

    /// SIGKILL the worker. A worker that already exited is not an error.
    pub fn kill(&mut self) {
        if self.state == WorkerState::Reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            tracing::debug!(pid = self.pid, error = %e, "kill failed, worker already exited");
        }
    }

    /// Wait for the process to exit, killing it if it is still alive after
    /// `grace`. Reaps at most once; later calls return the recorded status.
    pub fn reap(&mut self, grace: Duration) -> Option<ExitStatus> {
        if self.state == WorkerState::Reaped {
            return self.exit_status;
        }
        let deadline = Instant::now() + grace;
        let status = loop {
            match self.child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
                Ok(None) => {
                    tracing::debug!(pid = self.pid, "worker outlived reap grace, killing");
                    let _ = self.child.kill();
                    break self.child.wait().ok();
                }
                Err(e) => {
                    tracing::warn!(pid = self.pid, error = %e, "failed to poll worker");
                    let _ = self.child.kill();
                    break self.child.wait().ok();
                }
            }
        };
        if self.outcome.is_none() {
            self.outcome = Some(WorkerState::Crashed);
        }
        self.exit_status = status;
        self.state = WorkerState::Reaped;
        tracing::debug!(pid = self.pid, status = ?status, outcome = ?self.outcome, "reaped worker");
        status
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        if self.state != WorkerState::Reaped {
            self.kill();
            self.reap(Duration::ZERO);
        }
    }
}

/// Describe how a worker exited.
pub fn describe_exit(status: Option<ExitStatus>) -> String {
    let Some(status) = status else {
        return "exit status unknown".to_string();
    };
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("killed by signal {}", signal);
        }
    }
    match status.code() {
        Some(code) => format!("exit code {}", code),
        None => status.to_string(),
    }
}

/// Locate the worker binary.
///
/// Search order:
/// 1. `configured`, when given
/// 2. `SANDFRAME_WORKER_PATH`
/// 3. next to the current executable
/// 4. `PATH`
/// 5. `target/{debug,release}` relative to the crate, for development
pub fn find_worker_binary(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::WorkerNotFound(format!(
            "configured worker path '{}' does not exist",
            path.display()
        )));
    }

    if let Ok(path) = std::env::var(WORKER_PATH_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!(path = %path.display(), "{} points at a missing file", WORKER_PATH_ENV);
    }

    if let Some(dir) = std::env::current_exe().ok().as_deref().and_then(Path::parent) {
        for candidate in [dir.join(WORKER_BINARY), dir.join("..").join(WORKER_BINARY)] {
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
    }

    if let Ok(path) = which::which(WORKER_BINARY) {
        return Ok(path);
    }

    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    for profile in ["debug", "release"] {
        let path = manifest_dir
            .join("..")
            .join("..")
            .join("target")
            .join(profile)
            .join(WORKER_BINARY);
        if path.is_file() {
            return Ok(path.canonicalize().unwrap_or(path));
        }
    }

    Err(Error::WorkerNotFound(format!(
        "could not find {}. Set {} or ensure it is in PATH",
        WORKER_BINARY, WORKER_PATH_ENV
    )))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh() -> PathBuf {
        PathBuf::from("/bin/sh")
    }

    #[test]
    fn test_missing_configured_path() {
        let err = find_worker_binary(Some(Path::new("/nonexistent/sandframe-worker"))).unwrap_err();
        assert!(matches!(err, Error::WorkerNotFound(_)));
    }

    #[test]
    fn test_configured_path_wins() {
        assert_eq!(find_worker_binary(Some(&sh())).unwrap(), sh());
    }

    #[test]
    fn test_spawn_failure_is_ipc_error() {
        assert!(WorkerProcess::spawn(Path::new("/nonexistent/worker"), false).is_err());
    }

    #[test]
    fn test_lifecycle_reaches_reaped_once() {
        // `sh` reading an empty script exits as soon as stdin closes.
        let mut worker = WorkerProcess::spawn(&sh(), false).unwrap();
        assert_eq!(worker.state(), WorkerState::Spawned);
        let (stdin, _stdout) = worker.take_io().unwrap();
        assert_eq!(worker.state(), WorkerState::Running);
        drop(stdin);

        worker.finish(WorkerState::Completed);
        worker.finish(WorkerState::Crashed);
        assert_eq!(worker.state(), WorkerState::Completed);

        let status = worker.reap(Duration::from_secs(5));
        assert!(status.is_some_and(|s| s.success()));
        assert_eq!(worker.state(), WorkerState::Reaped);
        assert_eq!(worker.outcome(), Some(WorkerState::Completed));
        assert_eq!(worker.reap(Duration::ZERO), status);
    }

    #[test]
    fn test_kill_then_reap_reports_signal() {
        let mut worker = WorkerProcess::spawn(&sh(), false).unwrap();
        let _io = worker.take_io().unwrap();
        worker.kill();
        worker.finish(WorkerState::TimedOut);
        let status = worker.reap(Duration::from_secs(5));
        assert_eq!(describe_exit(status), "killed by signal 9");
        assert_eq!(worker.outcome(), Some(WorkerState::TimedOut));
    }

    #[test]
    fn test_drop_reaps_running_worker() {
        let worker = WorkerProcess::spawn(&sh(), false).unwrap();
        let pid = worker.pid() as libc::pid_t;
        drop(worker);
        // The pid is no longer a child of ours once reaped.
        let rc = unsafe { libc::waitpid(pid, std::ptr::null_mut(), libc::WNOHANG) };
        assert_eq!(rc, -1);
    }
}
