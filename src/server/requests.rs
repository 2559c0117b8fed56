//! MCP tool request types.
//!
//! These structs define the parameters for each MCP tool exposed by the server.

use rmcp::schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EmptyParams {}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PingRequest {
    #[schemars(description = "Optional message to echo back (default: \"pong\")")]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateSessionRequest {
    #[schemars(description = "Optional human-readable label for the session")]
    #[serde(alias = "base_name")]
    pub label: Option<String>,
    #[schemars(description = "Optional SU2 config text written to the session config file")]
    pub initial_config: Option<String>,
    #[schemars(description = "Optional mesh contents, base64 encoded")]
    #[serde(alias = "initial_mesh")]
    pub initial_mesh_base64: Option<String>,
    #[schemars(description = "File name for the initial mesh (default: mesh.su2)")]
    pub mesh_file_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CloseSessionRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
    #[schemars(description = "Also delete the session directory and all outputs (default: false)")]
    #[serde(alias = "delete_workdir")]
    pub delete_directory: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateConfigRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
    #[schemars(
        description = "Map of config key to value. Strings, numbers, booleans (written as YES/NO), and arrays (written as comma lists) are accepted."
    )]
    pub updates: Map<String, Value>,
    #[schemars(description = "Append keys that are not yet in the config (default: true)")]
    pub create_if_missing: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetConfigTextRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
    #[schemars(description = "Complete config file text; replaces the existing config")]
    #[serde(alias = "text")]
    pub config_text: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetMeshRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
    #[schemars(description = "Mesh file contents, base64 encoded")]
    pub mesh_base64: String,
    #[schemars(description = "File name inside the session directory (default: mesh.su2)")]
    pub mesh_file_name: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunSolverRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
    #[schemars(description = "Solver executable name or path (default: SU2_CFD)")]
    pub solver: Option<String>,
    #[schemars(description = "Config file relative to the session directory (default: the session config)")]
    #[serde(alias = "config_override_path")]
    pub config_override: Option<String>,
    #[schemars(description = "Kill the solver after this many seconds (default: 600)")]
    #[serde(alias = "max_runtime_seconds")]
    pub timeout_secs: Option<u64>,
    #[schemars(description = "Extra arguments passed after the config file")]
    pub extra_args: Option<Vec<String>>,
    #[schemars(description = "Number of output lines kept in log_tail (default: 200)")]
    #[serde(alias = "capture_log_lines")]
    pub log_tail_lines: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeformMeshRequest {
    #[schemars(description = "Session id returned by create_su2_session")]
    pub session_id: String,
    #[schemars(description = "Deformation config relative to the session directory (default: the session config)")]
    #[serde(alias = "def_config_path")]
    pub def_config: Option<String>,
    #[schemars(description = "Expected output mesh file name (default: the config's MESH_OUT_FILENAME)")]
    pub output_mesh_name: Option<String>,
    #[schemars(description = "Kill SU2_DEF after this many seconds (default: 600)")]
    #[serde(alias = "max_runtime_seconds")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolCatalogRequest {
    #[schemars(description = "What you're trying to accomplish (e.g., 'change the Mach number')")]
    pub query: Option<String>,
    #[schemars(description = "Filter by category: core, session, config, mesh, run")]
    pub category: Option<String>,
    #[schemars(description = "Maximum number of tools to return (default: 7)")]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ToolHelpRequest {
    #[schemars(description = "Name of the tool to get help for")]
    pub name: String,
}
