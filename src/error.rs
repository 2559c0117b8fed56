//! Error types for the SU2 MCP server.
//!
//! Core errors are returned with `is_error: true` in CallToolResult. Solver
//! misbehavior (non-zero exit, timeout, missing binary) is never an error here;
//! it is reported as data in [`crate::ProcessResult`].

use rmcp::model::{CallToolResult, Content};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the session, config, mesh, and process layers.
#[derive(Error, Debug)]
pub enum Su2Error {
    #[error("Unknown session_id: {0}")]
    SessionNotFound(String),

    #[error("Config key not found: {0}")]
    KeyNotFound(String),

    #[error("Invalid session id: {0}")]
    InvalidSessionId(String),

    #[error("Failed to parse config {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Session {0} is busy with another run")]
    SessionBusy(String),

    #[error("Session {id} cannot {operation} while {state}")]
    InvalidState {
        id: String,
        state: String,
        operation: &'static str,
    },

    #[error("Invalid working directory: {0}")]
    InvalidWorkdir(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    #[error("Failed to spawn {binary}: {source}")]
    SpawnFailed {
        binary: String,
        #[source]
        source: std::io::Error,
    },
}

impl Su2Error {
    /// Wrap an I/O failure with the path it happened on.
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Su2Error::Storage {
            path: path.into(),
            source,
        }
    }

    /// Build a parse failure for the given file.
    pub fn parse(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Su2Error::Parse {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Stable machine-readable kind used in tool payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Su2Error::SessionNotFound(_) | Su2Error::KeyNotFound(_) => "not_found",
            Su2Error::Parse { .. } => "parse_error",
            Su2Error::Storage { .. } => "storage_error",
            Su2Error::SessionBusy(_) => "busy",
            Su2Error::InvalidState { .. } => "invalid_state",
            Su2Error::InvalidSessionId(_)
            | Su2Error::InvalidWorkdir(_)
            | Su2Error::InvalidPath(_)
            | Su2Error::InvalidParams(_) => "validation_error",
            Su2Error::SpawnFailed { .. } => "spawn_error",
        }
    }

    /// Convert to MCP CallToolResult with is_error: true
    pub fn to_tool_result(&self) -> CallToolResult {
        let body = json!({
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        CallToolResult::error(vec![Content::text(body.to_string())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(Su2Error::SessionNotFound("a".into()).kind(), "not_found");
        assert_eq!(Su2Error::KeyNotFound("MACH_NUMBER".into()).kind(), "not_found");
        assert_eq!(Su2Error::parse("case.cfg", "bad utf-8").kind(), "parse_error");
        assert_eq!(
            Su2Error::storage("/x", std::io::Error::other("disk full")).kind(),
            "storage_error"
        );
        assert_eq!(Su2Error::SessionBusy("a".into()).kind(), "busy");
        assert_eq!(Su2Error::InvalidPath("../x".into()).kind(), "validation_error");
    }

    #[test]
    fn tool_result_is_flagged_as_error() {
        let result = Su2Error::SessionNotFound("abc".into()).to_tool_result();
        assert_eq!(result.is_error, Some(true));
    }
}
