//! The process launcher and timeout supervisor.
//!
//! Every call to [`Sandbox::execute`] spawns one fresh worker, hands it the
//! script and a private copy of the dataset, and waits for one response or
//! the deadline, whichever comes first. The worker is always reaped before
//! the call returns.

use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::code::CodeUnit;
use crate::config::{SandboxConfig, TimeoutPolicy, WorkerOptions};
use crate::dataset::DatasetSnapshot;
use crate::error::{Error, Result};
use crate::ipc::{
    WorkerCommand, WorkerProcess, WorkerResponse, WorkerState, decode, describe_exit, encode,
    find_worker_binary, read_frame, read_message, write_frame, write_message,
};
use crate::result::{ErrorKind, ExecutionResult};

/// The result of one execution plus what happened to its worker.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    /// `None` when no worker was spawned.
    pub pid: Option<u32>,
    /// Terminal state reached before reaping.
    pub outcome: Option<WorkerState>,
    /// State of the handle when the call returned.
    pub final_state: Option<WorkerState>,
    pub elapsed: Duration,
}

/// Admission ceiling on simultaneously running workers.
#[derive(Debug)]
pub struct WorkerGate {
    limit: Option<usize>,
    running: Mutex<usize>,
    freed: Condvar,
}

/// A slot in a [`WorkerGate`], released on drop.
#[derive(Debug)]
pub struct GatePermit<'a> {
    gate: &'a WorkerGate,
}

impl WorkerGate {
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit: limit.map(|n| n.max(1)),
            running: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    /// Block until a slot is free.
    pub fn acquire(&self) -> GatePermit<'_> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(limit) = self.limit {
            while *running >= limit {
                running = self.freed.wait(running).unwrap_or_else(PoisonError::into_inner);
            }
        }
        *running += 1;
        GatePermit { gate: self }
    }

    pub fn running(&self) -> usize {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for GatePermit<'_> {
    fn drop(&mut self) {
        let mut running = self.gate.running.lock().unwrap_or_else(PoisonError::into_inner);
        *running = running.saturating_sub(1);
        self.gate.freed.notify_one();
    }
}

/// Runs untrusted scripts in isolated worker processes.
///
/// `Sandbox` is `Send + Sync`; concurrent calls each get their own process.
#[derive(Debug)]
pub struct Sandbox {
    config: SandboxConfig,
    gate: WorkerGate,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new(SandboxConfig::default())
    }
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        let gate = WorkerGate::new(config.max_concurrent_workers);
        Self { config, gate }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Resolve the worker binary for this sandbox.
    pub fn worker_path(&self) -> Result<PathBuf> {
        find_worker_binary(self.config.worker_path.as_deref())
    }

    /// Run `code` against `dataset`. Never fails: every outcome, including
    /// spawn failure and timeout, is an [`ExecutionResult`].
    pub fn execute(
        &self,
        code: &CodeUnit,
        dataset: &DatasetSnapshot,
        timeout: Option<TimeoutPolicy>,
    ) -> ExecutionResult {
        self.execute_with_report(code, dataset, timeout).result
    }

    /// Like [`execute`](Self::execute), also reporting the worker lifecycle.
    pub fn execute_with_report(
        &self,
        code: &CodeUnit,
        dataset: &DatasetSnapshot,
        timeout: Option<TimeoutPolicy>,
    ) -> ExecutionReport {
        let timeout = timeout.unwrap_or_else(|| self.config.default_timeout());
        let _permit = self.gate.acquire();
        let started = Instant::now();

        let unspawned = |result: ExecutionResult| ExecutionReport {
            result,
            pid: None,
            outcome: None,
            final_state: None,
            elapsed: started.elapsed(),
        };

        let path = match self.worker_path() {
            Ok(path) => path,
            Err(e) => {
                tracing::warn!(error = %e, "no worker binary");
                return unspawned(ExecutionResult::error(ErrorKind::SpawnFailure, e.with_hint()));
            }
        };
        let command = WorkerCommand::Execute {
            source: code.source().to_string(),
            dataset: dataset.clone(),
            options: WorkerOptions::for_request(&self.config, timeout),
        };
        let frame = match encode(&command) {
            Ok(frame) => frame,
            Err(e) => {
                return unspawned(ExecutionResult::error(ErrorKind::SerializationFailure, e.to_string()));
            }
        };
        let mut worker = match WorkerProcess::spawn(&path, self.config.forward_worker_logs) {
            Ok(worker) => worker,
            Err(e) => {
                tracing::warn!(error = %e, "worker spawn failed");
                return unspawned(ExecutionResult::error(ErrorKind::SpawnFailure, e.to_string()));
            }
        };

        let result = self.supervise(&mut worker, frame.to_vec(), timeout);
        ExecutionReport {
            result,
            pid: Some(worker.pid()),
            outcome: worker.outcome(),
            final_state: Some(worker.state()),
            elapsed: started.elapsed(),
        }
    }

    /// Deliver the frame, wait for a response within `timeout`, then reap.
    fn supervise(&self, worker: &mut WorkerProcess, frame: Vec<u8>, timeout: TimeoutPolicy) -> ExecutionResult {
        let grace = self.config.reap_grace();
        let (stdin, stdout) = match worker.take_io() {
            Ok(io) => io,
            Err(e) => {
                worker.kill();
                worker.finish(WorkerState::Crashed);
                worker.reap(grace);
                return ExecutionResult::error(ErrorKind::SpawnFailure, e.to_string());
            }
        };

        let handed_over = Instant::now();
        let pid = worker.pid();
        let writer = thread::spawn(move || {
            let mut stdin = BufWriter::new(stdin);
            if let Err(e) = write_frame(&mut stdin, &frame) {
                tracing::debug!(pid, error = %e, "worker stopped reading its input");
            }
        });
        let (tx, rx) = mpsc::channel();
        let reader = thread::spawn(move || {
            let _ = tx.send(read_frame(&mut BufReader::new(stdout)));
        });

        // recv_timeout falls back to a blocking recv when the deadline is unrepresentable.
        let remaining = timeout.duration().saturating_sub(handed_over.elapsed());
        let received = match rx.recv_timeout(remaining) {
            Ok(frame) => Some(frame),
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!(pid, timeout = ?timeout.duration(), "deadline elapsed, killing worker");
                worker.kill();
                // A response may have landed just before the kill.
                rx.recv_timeout(grace).ok().filter(|frame| matches!(frame, Ok(Some(_))))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Some(Err(Error::Ipc("response reader stopped unexpectedly".to_string())))
            }
        };

        let result = match received {
            None => {
                worker.finish(WorkerState::TimedOut);
                ExecutionResult::error(
                    ErrorKind::TimeoutExceeded,
                    format!("execution exceeded {:.1}s", timeout.duration().as_secs_f64()),
                )
            }
            Some(Ok(Some(bytes))) => match decode::<WorkerResponse>(&bytes) {
                Ok(WorkerResponse::Result(result)) => {
                    worker.finish(WorkerState::Completed);
                    result
                }
                Ok(WorkerResponse::Pong) => {
                    worker.finish(WorkerState::Crashed);
                    ExecutionResult::error(ErrorKind::SerializationFailure, "worker answered with a pong")
                }
                Err(e) => {
                    worker.finish(WorkerState::Crashed);
                    tracing::warn!(pid, error = %e, "worker response failed validation");
                    ExecutionResult::error(ErrorKind::SerializationFailure, e.to_string())
                }
            },
            Some(Ok(None)) => {
                worker.finish(WorkerState::Crashed);
                let status = worker.reap(grace);
                ExecutionResult::error(
                    ErrorKind::NoOutput,
                    format!("worker exited without producing a result ({})", describe_exit(status)),
                )
            }
            Some(Err(e)) => {
                worker.finish(WorkerState::Crashed);
                ExecutionResult::error(ErrorKind::SerializationFailure, e.to_string())
            }
        };

        worker.reap(grace);
        let _ = writer.join();
        let _ = reader.join();
        tracing::debug!(pid, kind = result.kind_name(), outcome = ?worker.outcome(), "execution finished");
        result
    }

    /// Spawn a worker, check it answers a ping, and shut it down.
    pub fn ping(&self) -> Result<Duration> {
        let path = self.worker_path()?;
        let started = Instant::now();
        let mut worker = WorkerProcess::spawn(&path, self.config.forward_worker_logs)?;
        let (stdin, stdout) = worker.take_io()?;
        let mut stdin = BufWriter::new(stdin);
        let mut stdout = BufReader::new(stdout);

        write_message(&mut stdin, &WorkerCommand::Ping)?;
        let response = read_message::<_, WorkerResponse>(&mut stdout);
        let _ = write_message(&mut stdin, &WorkerCommand::Shutdown);
        drop(stdin);
        match response {
            Ok(WorkerResponse::Pong) => worker.finish(WorkerState::Completed),
            _ => worker.finish(WorkerState::Crashed),
        }
        worker.reap(self.config.reap_grace());
        match response? {
            WorkerResponse::Pong => Ok(started.elapsed()),
            other => Err(Error::Ipc(format!("unexpected response to ping: {:?}", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::result::ScalarValue;

    fn assert_send_sync<T: Send + Sync>() {}

    /// Write an executable shell script standing in for the worker.
    #[cfg(unix)]
    fn shell_worker(dir: &tempfile::TempDir, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.path().join("worker.sh");
        std::fs::write(&script, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[test]
    fn test_sandbox_is_send_sync() {
        assert_send_sync::<Sandbox>();
    }

    #[test]
    fn test_missing_worker_is_spawn_failure() {
        let config = SandboxConfig::default().with_worker_path("/nonexistent/sandframe-worker");
        let report = Sandbox::new(config).execute_with_report(
            &CodeUnit::new("result = 1"),
            &DatasetSnapshot::empty(),
            None,
        );
        assert_eq!(report.result.error_kind(), Some(ErrorKind::SpawnFailure));
        assert!(report.pid.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_worker_is_no_output() {
        // `true` ignores its input and exits without writing a frame.
        let config = SandboxConfig::default().with_worker_path("/bin/true");
        let report = Sandbox::new(config).execute_with_report(
            &CodeUnit::new("result = 1"),
            &DatasetSnapshot::empty(),
            None,
        );
        match &report.result {
            ExecutionResult::Error { kind, diagnostic } => {
                assert_eq!(*kind, ErrorKind::NoOutput);
                assert!(diagnostic.contains("exit code 0"));
            }
            other => panic!("expected no output, got {:?}", other),
        }
        assert_eq!(report.final_state, Some(WorkerState::Reaped));
        assert_eq!(report.outcome, Some(WorkerState::Crashed));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_worker_times_out() {
        // Never reads its input and never answers.
        let dir = tempfile::TempDir::new().unwrap();
        let script = shell_worker(&dir, "exec /bin/sleep 30");

        let config = SandboxConfig::default().with_worker_path(&script);
        let report = Sandbox::new(config).execute_with_report(
            &CodeUnit::new("result = 1"),
            &DatasetSnapshot::empty(),
            Some(TimeoutPolicy::new(Duration::from_millis(300))),
        );
        assert_eq!(report.result.error_kind(), Some(ErrorKind::TimeoutExceeded));
        assert_eq!(report.outcome, Some(WorkerState::TimedOut));
        assert_eq!(report.final_state, Some(WorkerState::Reaped));
        assert!(report.elapsed < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn test_result_written_before_deadline_wins() {
        // Answers at once, then lingers well past the deadline.
        let dir = tempfile::TempDir::new().unwrap();
        let response = WorkerResponse::Result(ExecutionResult::scalar(ScalarValue::Integer(7)));
        let mut frame = Vec::new();
        write_frame(&mut frame, &encode(&response).unwrap()).unwrap();
        let frame_path = dir.path().join("response.bin");
        std::fs::write(&frame_path, &frame).unwrap();
        let script = shell_worker(
            &dir,
            &format!("/bin/cat '{}'\nexec /bin/sleep 30", frame_path.display()),
        );

        let mut config = SandboxConfig::default().with_worker_path(&script);
        config.reap_grace_ms = 100;
        let report = Sandbox::new(config).execute_with_report(
            &CodeUnit::new("result = 7"),
            &DatasetSnapshot::empty(),
            Some(TimeoutPolicy::new(Duration::from_millis(500))),
        );
        assert_eq!(report.result, ExecutionResult::scalar(ScalarValue::Integer(7)));
        assert_eq!(report.outcome, Some(WorkerState::Completed));
        assert_eq!(report.final_state, Some(WorkerState::Reaped));
    }

    #[cfg(unix)]
    #[test]
    fn test_unbounded_timeout_does_not_panic() {
        let config = SandboxConfig::default().with_worker_path("/bin/true");
        let report = Sandbox::new(config).execute_with_report(
            &CodeUnit::new("result = 1"),
            &DatasetSnapshot::empty(),
            Some(TimeoutPolicy::new(Duration::MAX)),
        );
        assert_eq!(report.result.error_kind(), Some(ErrorKind::NoOutput));
        assert_eq!(report.final_state, Some(WorkerState::Reaped));
    }

    #[test]
    fn test_gate_limits_concurrency() {
        let gate = Arc::new(WorkerGate::new(Some(1)));
        let first = gate.acquire();
        assert_eq!(gate.running(), 1);

        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let _permit = gate.acquire();
                gate.running()
            })
        };
        thread::sleep(Duration::from_millis(50));
        assert_eq!(gate.running(), 1);
        drop(first);
        assert_eq!(waiter.join().unwrap(), 1);
        assert_eq!(gate.running(), 0);
    }

    #[test]
    fn test_unbounded_gate_never_blocks() {
        let gate = WorkerGate::new(None);
        let permits: Vec<_> = (0..8).map(|_| gate.acquire()).collect();
        assert_eq!(gate.running(), 8);
        drop(permits);
        assert_eq!(gate.running(), 0);
    }
}
