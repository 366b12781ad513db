//! Subprocess execution for a single step (§4.6 step 8, §4.6 "Subprocess
//! execution model").
//!
//! Each step's executable is spawned via `tokio::process::Command` with
//! stdout/stderr captured as pipes. Lifecycle is tracked through an explicit
//! [`ProcessStatus`] so a configured per-step timeout can cleanly
//! distinguish a normal exit from a forced kill.

use chrono::{DateTime, Utc};
use dtrpc_error::{DtrpcError, ErrorCode};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::warn;

/// Configuration for spawning a step's executable.
#[derive(Clone, Debug)]
pub struct ProcessConfig {
    /// Working directory for the process (the extracted call directory).
    pub working_dir: PathBuf,
    /// Additional environment variables to set.
    pub env_vars: BTreeMap<String, String>,
    /// Maximum time the process is allowed to run before being killed.
    pub timeout: Option<Duration>,
    /// Whether to inherit the server process's environment variables.
    pub inherit_env: bool,
}

impl ProcessConfig {
    /// Configuration for running in `working_dir` with no timeout, inheriting
    /// the parent environment.
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            working_dir,
            env_vars: BTreeMap::new(),
            timeout: None,
            inherit_env: true,
        }
    }

    /// Set the per-step timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Runtime status of a spawned step process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The process has not been started yet.
    NotStarted,
    /// The process is currently running.
    Running {
        /// OS process identifier.
        pid: u32,
    },
    /// The process exited normally with the given code.
    Exited {
        /// Exit code returned by the process.
        code: i32,
    },
    /// The process was forcefully killed (not due to a timeout).
    Killed,
    /// The process exceeded its configured timeout and was terminated.
    TimedOut,
}

impl ProcessStatus {
    /// `true` if the process terminated, by whatever means.
    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            ProcessStatus::Exited { .. } | ProcessStatus::Killed | ProcessStatus::TimedOut
        )
    }

    /// `true` if the process exited with code 0.
    pub fn succeeded(&self) -> bool {
        matches!(self, ProcessStatus::Exited { code } if *code == 0)
    }
}

/// The captured outcome of running a step's executable.
#[derive(Clone, Debug)]
pub struct ExecutionOutcome {
    /// Terminal status of the process.
    pub status: ProcessStatus,
    /// Captured stdout, trailing whitespace trimmed (§4.6 step 8).
    pub stdout: String,
    /// Captured stderr, untrimmed.
    pub stderr: String,
    /// When the process was started.
    pub started_at: DateTime<Utc>,
    /// When the process ended.
    pub ended_at: DateTime<Utc>,
}

impl ExecutionOutcome {
    /// The result string written back into the job document for this step:
    /// stdout on success, stderr on failure.
    pub fn result_string(&self) -> &str {
        if self.status.succeeded() {
            &self.stdout
        } else {
            &self.stderr
        }
    }
}

/// Spawn `executable` with `args` under `config`, capturing stdout/stderr
/// and enforcing the configured timeout.
pub async fn run_step(
    executable: &PathBuf,
    args: &[String],
    config: &ProcessConfig,
) -> Result<ExecutionOutcome, DtrpcError> {
    let started_at = Utc::now();

    let mut cmd = Command::new(executable);
    cmd.args(args)
        .current_dir(&config.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if !config.inherit_env {
        cmd.env_clear();
    }
    for (k, v) in &config.env_vars {
        cmd.env(k, v);
    }

    let mut child = cmd.spawn().map_err(|e| {
        DtrpcError::new(
            ErrorCode::ExecutionFailed,
            format!("failed to spawn {}: {e}", executable.display()),
        )
    })?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let run = async {
        let mut stdout_buf = Vec::new();
        let mut stderr_buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe.take() {
            let _ = pipe.read_to_end(&mut stdout_buf).await;
        }
        if let Some(mut pipe) = stderr_pipe.take() {
            let _ = pipe.read_to_end(&mut stderr_buf).await;
        }
        let status = child.wait().await;
        (status, stdout_buf, stderr_buf)
    };

    let (wait_result, status) = match config.timeout {
        Some(timeout) => match tokio::time::timeout(timeout, run).await {
            Ok((status, stdout, stderr)) => ((status, stdout, stderr), None),
            Err(_) => {
                warn!(target: "dtrpc.host.process", path = %executable.display(), "step timed out, killing");
                let _ = child.kill().await;
                let _ = child.wait().await;
                ((Ok(None), Vec::new(), Vec::new()), Some(ProcessStatus::TimedOut))
            }
        },
        None => {
            let (status, stdout, stderr) = run.await;
            ((status, stdout, stderr), None)
        }
    };

    let ended_at = Utc::now();
    let (exit_result, stdout_buf, stderr_buf) = wait_result;

    let final_status = if let Some(timed_out) = status {
        timed_out
    } else {
        match exit_result {
            Ok(Some(exit_status)) => match exit_status.code() {
                Some(code) => ProcessStatus::Exited { code },
                None => ProcessStatus::Killed,
            },
            Ok(None) | Err(_) => ProcessStatus::Killed,
        }
    };

    Ok(ExecutionOutcome {
        status: final_status,
        stdout: String::from_utf8_lossy(&stdout_buf).trim_end().to_string(),
        stderr: String::from_utf8_lossy(&stderr_buf).to_string(),
        started_at,
        ended_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProcessConfig::new(dir.path().to_path_buf());
        let outcome = run_step(
            &PathBuf::from("/bin/echo"),
            &["  hello  ".to_string()],
            &config,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, ProcessStatus::Exited { code: 0 });
        assert_eq!(outcome.stdout, "  hello");
        assert!(outcome.status.succeeded());
    }

    #[tokio::test]
    async fn nonzero_exit_is_not_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = ProcessConfig::new(dir.path().to_path_buf());
        let outcome = run_step(
            &PathBuf::from("/bin/sh"),
            &["-c".to_string(), "exit 3".to_string()],
            &config,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, ProcessStatus::Exited { code: 3 });
        assert!(!outcome.status.succeeded());
    }

    #[tokio::test]
    async fn timeout_kills_and_reports_timed_out() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            ProcessConfig::new(dir.path().to_path_buf()).with_timeout(Duration::from_millis(50));
        let outcome = run_step(
            &PathBuf::from("/bin/sleep"),
            &["5".to_string()],
            &config,
        )
        .await
        .unwrap();

        assert_eq!(outcome.status, ProcessStatus::TimedOut);
    }
}
