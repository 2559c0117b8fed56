//! Runtime settings for the session store and the process runner.
//!
//! `main.rs` fills these from CLI flags and `SU2_MCP_*` environment variables;
//! tests construct them directly.

use std::path::PathBuf;
use std::time::Duration;

/// Default name of the per-session solver config file.
pub const DEFAULT_CONFIG_FILE_NAME: &str = "case.cfg";
/// Default per-stream output capture ceiling (1 MiB).
pub const DEFAULT_CAPTURE_LIMIT_BYTES: usize = 1024 * 1024;
/// Default solver timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Upper bound for any requested solver timeout (one day).
pub const MAX_TIMEOUT_SECS: u64 = 86_400;
/// How long to keep reading pipes after the child has exited.
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 2_000;

/// Settings for [`crate::SessionStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Directory under which every session directory is created.
    pub sessions_root: PathBuf,
    /// Deleting an unknown session fails with `SessionNotFound` instead of being a no-op.
    pub strict_delete: bool,
    /// Remove session directories when the store shuts down.
    pub cleanup_on_shutdown: bool,
    /// File name of the solver config inside each session directory.
    pub config_file_name: String,
}

impl StoreSettings {
    pub fn with_root(sessions_root: impl Into<PathBuf>) -> Self {
        Self {
            sessions_root: sessions_root.into(),
            ..Self::default()
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            sessions_root: std::env::temp_dir().join("su2-mcp-sessions"),
            strict_delete: false,
            cleanup_on_shutdown: true,
            config_file_name: DEFAULT_CONFIG_FILE_NAME.to_string(),
        }
    }
}

/// Settings for [`crate::ProcessRunner`].
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Bytes kept per output stream; older output is dropped first.
    pub capture_limit_bytes: usize,
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub drain_timeout: Duration,
}

impl RunnerSettings {
    /// Resolve a requested timeout into `[1, max_timeout_secs]`.
    pub fn effective_timeout(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, self.max_timeout_secs.max(1))
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            capture_limit_bytes: DEFAULT_CAPTURE_LIMIT_BYTES,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_timeout_secs: MAX_TIMEOUT_SECS,
            drain_timeout: Duration::from_millis(DEFAULT_DRAIN_TIMEOUT_MS),
        }
    }
}
