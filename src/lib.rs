//! SU2 MCP Server
//!
//! This library provides an MCP (Model Context Protocol) server that lets LLM
//! agents drive the SU2 CFD suite through isolated sessions. Each session is
//! a private working directory holding a solver config, a mesh, and whatever
//! the solver writes.
//!
//! # Architecture
//!
//! - **SessionStore**: owns the id → session map and the sessions root.
//!   Operations on one session are serialized by a per-session lock;
//!   different sessions run in parallel.
//!
//! - **ConfigDocument**: line-preserving model of an SU2 `.cfg` file. Only the
//!   lines that are set change; everything else round-trips byte-for-byte.
//!
//! - **ProcessRunner**: resolves and spawns solver binaries inside a session
//!   directory with bounded output capture and a hard timeout that kills the
//!   whole process group.
//!
//! - **mesh**: copies or writes a mesh into a session and sets `MESH_FILENAME`.
//!
//! - **Su2McpServer**: the MCP tool surface over the pieces above, served over
//!   stdio with `rmcp`.
//!
//! # Tools
//!
//! ## Session
//! - `create_su2_session`, `close_su2_session`, `get_session_info`, `list_sessions`
//!
//! ## Config
//! - `get_config_text`, `parse_config`, `update_config_entries`, `set_config_text`
//!
//! ## Mesh
//! - `set_mesh`
//!
//! ## Run
//! - `run_su2_solver`, `generate_deformed_mesh`
//!
//! ## Core
//! - `ping`, `tool_catalog`, `tool_help`

use std::path::PathBuf;

pub mod config;
pub mod error;
mod fs_util;
pub mod mesh;
pub mod process;
pub mod server;
pub mod session;
pub mod settings;
pub mod tool_registry;

pub use config::{ConfigDocument, ConfigValue};
pub use error::Su2Error;
pub use mesh::{attach_mesh, attach_mesh_bytes};
pub use process::{ProcessResult, ProcessRunner};
pub use server::Su2McpServer;
pub use session::{
    CreateOptions, DeformOptions, DeformOutcome, LastRun, RunOptions, Session, SessionState,
    SessionStore,
};
pub use settings::{RunnerSettings, StoreSettings};
pub use tool_registry::{ToolCategory, ToolInfo, TOOL_REGISTRY};

/// Expand `~/` prefix to the user's home directory.
pub fn expand_path(path: &str) -> PathBuf {
    path.strip_prefix("~/")
        .and_then(|stripped| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(stripped)))
        .unwrap_or_else(|| PathBuf::from(path))
}
