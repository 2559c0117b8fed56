//! Session and run metadata types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::process::ProcessResult;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Directory exists, no configuration written yet.
    Created,
    /// A configuration has been written; ready to run.
    Configured,
    /// A solver process is executing.
    Running,
    /// Last run exited with status 0 before its timeout.
    Completed,
    /// Last run exited non-zero, timed out, or its binary was missing.
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Configured => "configured",
            SessionState::Running => "running",
            SessionState::Completed => "completed",
            SessionState::Failed => "failed",
        }
    }

    /// States from which a solver run may start.
    pub fn can_run(&self) -> bool {
        matches!(
            self,
            SessionState::Configured | SessionState::Completed | SessionState::Failed
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary of the most recent solver run in a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastRun {
    pub solver: String,
    /// Config file passed to the solver, relative to the session directory.
    pub config_used: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub binary_missing: bool,
    pub runtime_seconds: f64,
    pub log_tail: String,
    pub finished_at: DateTime<Utc>,
}

impl LastRun {
    pub fn from_result(result: &ProcessResult, config_used: &str, tail_lines: usize) -> Self {
        Self {
            solver: result.binary.clone(),
            config_used: config_used.to_string(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            binary_missing: result.binary_missing,
            runtime_seconds: result.runtime_seconds,
            log_tail: result.log_tail(tail_lines),
            finished_at: Utc::now(),
        }
    }
}

/// Snapshot of a session (serializable for API responses).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier; also the directory name under the sessions root.
    pub id: String,
    /// Optional human-readable label supplied at creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Absolute path of the session's private working directory.
    pub directory: PathBuf,
    /// Absolute path of the solver config file inside `directory`.
    pub config_path: PathBuf,
    /// Absolute path of the attached mesh, once one has been attached.
    pub mesh_path: Option<PathBuf>,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<LastRun>,
}

/// Solver binary used when a run does not name one.
pub const DEFAULT_SOLVER: &str = "SU2_CFD";
/// Mesh deformation binary.
pub const DEFORM_SOLVER: &str = "SU2_DEF";
/// Lines of output kept in [`LastRun::log_tail`] by default.
pub const DEFAULT_LOG_TAIL_LINES: usize = 200;

/// Optional inputs for [`crate::SessionStore::create_session_with`].
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub label: Option<String>,
    /// Config text written to the session config file at creation.
    pub initial_config: Option<String>,
    /// Mesh `(file_name, bytes)` attached at creation.
    pub initial_mesh: Option<(String, Vec<u8>)>,
}

/// Parameters of one solver run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub solver: String,
    /// Config file relative to the session directory; the session config when absent.
    pub config_override: Option<String>,
    pub timeout_secs: Option<u64>,
    /// Appended after the config file argument.
    pub extra_args: Vec<String>,
    pub log_tail_lines: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            solver: DEFAULT_SOLVER.to_string(),
            config_override: None,
            timeout_secs: None,
            extra_args: Vec::new(),
            log_tail_lines: DEFAULT_LOG_TAIL_LINES,
        }
    }
}

/// Parameters of a mesh deformation run.
#[derive(Debug, Clone, Default)]
pub struct DeformOptions {
    /// Deformation binary; `SU2_DEF` when absent.
    pub solver: Option<String>,
    /// Deformation config relative to the session directory; the session config when absent.
    pub def_config: Option<String>,
    /// Expected output mesh file name, usually the config's `MESH_OUT_FILENAME`.
    pub output_mesh_name: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Outcome of [`crate::SessionStore::deform_mesh`].
#[derive(Debug, Clone, Serialize)]
pub struct DeformOutcome {
    #[serde(flatten)]
    pub result: ProcessResult,
    /// Present when the run succeeded and the output mesh exists.
    pub deformed_mesh_path: Option<PathBuf>,
}
