//! Subprocess execution with timeout, bounded capture, and outcome classification.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::capture::{self, SharedCapture};
use super::resolve::resolve_binary;
use crate::error::Su2Error;
use crate::settings::RunnerSettings;

/// Outcome of one external process invocation.
///
/// Non-zero exits, timeouts, and missing binaries are all reported here as
/// data; the caller decides what counts as failure.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    /// Binary name as requested.
    pub binary: String,
    /// Resolved executable path, absent when the binary was not found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_path: Option<PathBuf>,
    /// Exit code; absent when the process was killed (timeout or signal) or never spawned.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub binary_missing: bool,
    /// Older output was dropped from stdout or stderr to stay within the capture limit.
    pub truncated: bool,
    pub runtime_seconds: f64,
}

impl ProcessResult {
    /// Result for a binary that could not be located; nothing was spawned.
    pub fn missing_binary(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
            resolved_path: None,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            binary_missing: true,
            truncated: false,
            runtime_seconds: 0.0,
        }
    }

    /// Exited on its own with status 0.
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && !self.timed_out && !self.binary_missing
    }

    /// Last `lines` lines of stdout followed by stderr.
    pub fn log_tail(&self, lines: usize) -> String {
        let mut all: Vec<&str> = self.stdout.lines().collect();
        all.extend(self.stderr.lines());
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }
}

/// Launches external executables inside a working directory.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    settings: RunnerSettings,
    root: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(settings: RunnerSettings) -> Self {
        Self {
            settings,
            root: None,
        }
    }

    /// Only accept working directories inside `root`.
    pub fn confined_to(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Run `binary` with `args` in `working_dir`, killing it after `timeout_secs`.
    ///
    /// Errors only when `working_dir` is unusable or the OS refuses to spawn
    /// an executable that exists.
    pub async fn run(
        &self,
        binary: &str,
        args: &[String],
        working_dir: &Path,
        timeout_secs: u64,
    ) -> Result<ProcessResult, Su2Error> {
        self.run_with_deadline(binary, args, working_dir, Duration::from_secs(timeout_secs))
            .await
    }

    pub async fn run_with_deadline(
        &self,
        binary: &str,
        args: &[String],
        working_dir: &Path,
        deadline: Duration,
    ) -> Result<ProcessResult, Su2Error> {
        self.check_working_dir(working_dir)?;

        let Some(program) = resolve_binary(binary, working_dir) else {
            warn!(binary = %binary, "Solver binary not found");
            return Ok(ProcessResult::missing_binary(binary));
        };

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group so a timeout can take down anything the solver forked.
        #[cfg(unix)]
        cmd.process_group(0);

        let started = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(binary = %binary, error = %e, "Solver binary vanished before spawn");
                return Ok(ProcessResult::missing_binary(binary));
            }
            Err(e) => {
                return Err(Su2Error::SpawnFailed {
                    binary: binary.to_string(),
                    source: e,
                })
            }
        };
        let pid = child.id();
        info!(
            binary = %program.display(),
            pid = ?pid,
            cwd = %working_dir.display(),
            timeout_secs = deadline.as_secs(),
            "Spawned process"
        );

        let limit = self.settings.capture_limit_bytes;
        let stdout_sink = capture::shared(limit);
        let stderr_sink = capture::shared(limit);
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(capture::pump(out, stdout_sink.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(capture::pump(err, stderr_sink.clone())));
        }

        let (exit_code, timed_out) = match timeout(deadline, child.wait()).await {
            Ok(Ok(status)) => (status.code(), false),
            Ok(Err(e)) => {
                kill_process_tree(pid, &mut child).await;
                abort_readers(readers);
                return Err(Su2Error::SpawnFailed {
                    binary: binary.to_string(),
                    source: e,
                });
            }
            Err(_) => {
                warn!(pid = ?pid, timeout_secs = deadline.as_secs(), "Process timed out; killing");
                kill_process_tree(pid, &mut child).await;
                (None, true)
            }
        };

        self.drain_readers(readers).await;
        let (stdout, out_truncated) = finish(&stdout_sink);
        let (stderr, err_truncated) = finish(&stderr_sink);
        let runtime_seconds = started.elapsed().as_secs_f64();

        debug!(pid = ?pid, exit_code = ?exit_code, timed_out, runtime_seconds, "Process finished");

        Ok(ProcessResult {
            binary: binary.to_string(),
            resolved_path: Some(program),
            exit_code,
            stdout,
            stderr,
            timed_out,
            binary_missing: false,
            truncated: out_truncated || err_truncated,
            runtime_seconds,
        })
    }

    fn check_working_dir(&self, working_dir: &Path) -> Result<(), Su2Error> {
        if !working_dir.is_dir() {
            return Err(Su2Error::InvalidWorkdir(format!(
                "{} is not a directory",
                working_dir.display()
            )));
        }
        if let Some(root) = &self.root {
            let inside = match (working_dir.canonicalize(), root.canonicalize()) {
                (Ok(dir), Ok(root)) => dir.starts_with(&root) && dir != root,
                _ => false,
            };
            if !inside {
                return Err(Su2Error::InvalidWorkdir(format!(
                    "{} is outside {}",
                    working_dir.display(),
                    root.display()
                )));
            }
        }
        Ok(())
    }

    /// Wait for the pipe readers, bounded by the drain timeout.
    ///
    /// A grandchild that inherited the pipes can keep them open after the
    /// direct child exits; in that case the reader is aborted and the output
    /// captured so far is kept.
    async fn drain_readers(&self, readers: Vec<JoinHandle<()>>) {
        for mut handle in readers {
            if timeout(self.settings.drain_timeout, &mut handle).await.is_err() {
                debug!("Output reader still open after drain timeout; aborting");
                handle.abort();
            }
        }
    }
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new(RunnerSettings::default())
    }
}

fn finish(sink: &SharedCapture) -> (String, bool) {
    sink.lock().unwrap_or_else(|e| e.into_inner()).finish()
}

fn abort_readers(readers: Vec<JoinHandle<()>>) {
    for handle in readers {
        handle.abort();
    }
}

/// SIGKILL the child's process group, then kill and reap the child itself.
async fn kill_process_tree(pid: Option<u32>, child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pgid) = pid.and_then(|p| i32::try_from(p).ok()) {
            // SAFETY: kill(2) with a negative pid signals the process group created
            // for this child via process_group(0); no memory is touched.
            let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
            if rc != 0 {
                debug!(
                    pgid,
                    error = %std::io::Error::last_os_error(),
                    "Process group kill failed; falling back to direct kill"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "Direct kill failed (process likely already exited)");
    }
}
