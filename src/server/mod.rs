//! MCP server exposing SU2 session tools.
//!
//! Each tool handler calls one [`SessionStore`] (or mesh) operation and
//! serializes the outcome. Core errors become `is_error` tool results via
//! [`Su2Error::to_tool_result`]; solver failures are ordinary results.

mod requests;

pub use requests::*;

use crate::config::ConfigValue;
use crate::error::Su2Error;
use crate::mesh;
use crate::process::ProcessResult;
use crate::session::{
    CreateOptions, DeformOptions, RunOptions, SessionState, SessionStore, DEFAULT_LOG_TAIL_LINES,
    DEFAULT_SOLVER,
};
use crate::tool_registry::{self, ToolCategory};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo, Tool},
    schemars::{schema_for, JsonSchema},
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Mesh file name used when a request does not give one.
const DEFAULT_MESH_FILE_NAME: &str = "mesh.su2";

/// MCP server for SU2 sessions
#[derive(Clone)]
pub struct Su2McpServer {
    store: Arc<SessionStore>,
    tool_mux: ToolMux<Su2McpServer>,
}

#[derive(Clone)]
struct ToolMux<S> {
    call_router: ToolRouter<S>,
}

impl<S> ToolMux<S>
where
    S: Send + Sync + 'static,
{
    fn new(call_router: ToolRouter<S>) -> Self {
        Self { call_router }
    }

    async fn call(
        &self,
        context: ToolCallContext<'_, S>,
    ) -> Result<CallToolResult, rmcp::ErrorData> {
        self.call_router.call(context).await
    }

    /// Routed tools in registry order.
    fn list_all(&self) -> Vec<Tool> {
        tool_registry::all_tools()
            .filter_map(|info| self.call_router.map.get(info.name))
            .map(|route| route.attr.clone())
            .collect()
    }
}

/// Compact view of a run for tool responses; full stdout/stderr stay out of
/// the payload and the tail is returned instead.
#[derive(Debug, Serialize)]
struct RunReport {
    session_id: String,
    success: bool,
    solver: String,
    resolved_path: Option<PathBuf>,
    exit_code: Option<i32>,
    timed_out: bool,
    binary_missing: bool,
    truncated: bool,
    runtime_seconds: f64,
    log_tail: String,
    session_state: Option<SessionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deformed_mesh_path: Option<PathBuf>,
}

impl RunReport {
    fn new(session_id: &str, result: &ProcessResult, tail_lines: usize) -> Self {
        Self {
            session_id: session_id.to_string(),
            success: result.succeeded(),
            solver: result.binary.clone(),
            resolved_path: result.resolved_path.clone(),
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            binary_missing: result.binary_missing,
            truncated: result.truncated,
            runtime_seconds: result.runtime_seconds,
            log_tail: result.log_tail(tail_lines),
            session_state: None,
            deformed_mesh_path: None,
        }
    }
}

impl Su2McpServer {
    pub fn new(store: Arc<SessionStore>) -> Self {
        info!(root = %store.root().display(), "Creating SU2 MCP server");
        Self {
            store,
            tool_mux: ToolMux::new(Self::tool_router()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    fn instructions(&self) -> String {
        "SU2 CFD session server. Each session is an isolated working directory holding \
         an SU2 config file, a mesh, and solver outputs. \
         \n\nWorkflow: \
         \n1. create_su2_session: get a session_id (optionally seed config and mesh) \
         \n2. set_config_text or update_config_entries: write the SU2 config \
         \n3. set_mesh: upload the mesh (base64); MESH_FILENAME is set for you \
         \n4. run_su2_solver: run SU2_CFD in the session directory \
         \n5. get_session_info: check state and the last run's log tail \
         \n6. close_su2_session: close, optionally deleting the directory \
         \n\nConfig edits keep comments and untouched lines byte-identical. \
         Solver failures (non-zero exit, timeout, missing binary) are reported in the run result. \
         \n\nTool Categories: \
         \n- core: ping, tool_catalog, tool_help \
         \n- session: create_su2_session, close_su2_session, get_session_info, list_sessions \
         \n- config: get_config_text, parse_config, update_config_entries, set_config_text \
         \n- mesh: set_mesh \
         \n- run: run_su2_solver, generate_deformed_mesh \
         \n\nTip: Use tool_catalog(query='what you want to do') to find the right tool."
            .to_string()
    }

    async fn state_of(&self, session_id: &str) -> Option<SessionState> {
        self.store
            .get_session(session_id)
            .await
            .ok()
            .map(|s| s.state)
    }
}

fn json_result<T: Serialize + std::fmt::Debug>(value: &T) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_else(|_| format!("{value:?}")),
    )])
}

fn decode_base64(field: &str, data: &str) -> Result<Vec<u8>, Su2Error> {
    let cleaned: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    STANDARD
        .decode(cleaned)
        .map_err(|e| Su2Error::InvalidParams(format!("{field} is not valid base64: {e}")))
}

// Tool implementations using the #[tool_router] attribute

#[tool_router]
impl Su2McpServer {
    #[tool(description = "Health check. Echoes the message (default \"pong\") with the server name and a UTC timestamp. \
        Works without SU2 installed.")]
    #[instrument(skip(self))]
    async fn ping(
        &self,
        Parameters(req): Parameters<PingRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: ping");
        Ok(json_result(&json!({
            "ok": true,
            "message": req.message.unwrap_or_else(|| "pong".to_string()),
            "server": "su2-mcp",
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now().to_rfc3339(),
        })))
    }

    #[tool(description = "Create an isolated SU2 session with its own working directory. \
        Optionally seed the config (initial_config) and a base64 mesh (initial_mesh_base64, saved as mesh_file_name). \
        Returns session_id for use with every other tool.")]
    #[instrument(skip_all, fields(label = ?req.label))]
    async fn create_su2_session(
        &self,
        Parameters(req): Parameters<CreateSessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: create_su2_session");
        let initial_mesh = match req.initial_mesh_base64.as_deref() {
            Some(data) => match decode_base64("initial_mesh_base64", data) {
                Ok(bytes) => Some((
                    req.mesh_file_name
                        .unwrap_or_else(|| DEFAULT_MESH_FILE_NAME.to_string()),
                    bytes,
                )),
                Err(e) => return Ok(e.to_tool_result()),
            },
            None => None,
        };
        let options = CreateOptions {
            label: req.label,
            initial_config: req.initial_config,
            initial_mesh,
        };
        match self.store.create_session_with(options).await {
            Ok(session) => Ok(json_result(&session)),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Close a session. Set delete_directory=true to also remove its working directory and outputs.")]
    #[instrument(skip(self))]
    async fn close_su2_session(
        &self,
        Parameters(req): Parameters<CloseSessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        info!("Tool call: close_su2_session");
        match self
            .store
            .close_session(&req.session_id, req.delete_directory.unwrap_or(false))
            .await
        {
            Ok(closed) => Ok(json_result(&json!({
                "session_id": req.session_id,
                "success": closed,
            }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Get session paths, lifecycle state, and the last run summary (exit code, timeout, log tail).")]
    #[instrument(skip(self))]
    async fn get_session_info(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: get_session_info");
        match self.store.get_session(&req.session_id).await {
            Ok(session) => Ok(json_result(&session)),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "List all open sessions in creation order.")]
    #[instrument(skip(self))]
    async fn list_sessions(&self) -> Result<CallToolResult, McpError> {
        debug!("Tool call: list_sessions");
        let sessions = self.store.list_sessions().await;
        Ok(json_result(&json!({
            "count": sessions.len(),
            "sessions": sessions,
        })))
    }

    #[tool(description = "Return the raw text of the session's SU2 config file (empty if none written yet).")]
    #[instrument(skip(self))]
    async fn get_config_text(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: get_config_text");
        match self.store.read_config_text(&req.session_id).await {
            Ok(text) => Ok(json_result(&json!({ "config_text": text }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Parse the session config into typed key/value entries in file order. \
        Keys defined more than once resolve to their last definition and are listed in duplicate_keys.")]
    #[instrument(skip(self))]
    async fn parse_config(
        &self,
        Parameters(req): Parameters<SessionRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: parse_config");
        match self.store.load_config(&req.session_id).await {
            Ok(doc) => {
                let entries: serde_json::Map<String, Value> = doc
                    .entries()
                    .into_iter()
                    .map(|(key, value)| (key, json!(value)))
                    .collect();
                Ok(json_result(&json!({
                    "entries": entries,
                    "duplicate_keys": doc.duplicate_keys(),
                    "line_count": doc.line_count(),
                })))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Set config keys in place. Only the value portion of each key's line changes; \
        comments and all other lines are preserved. Unknown keys are appended unless create_if_missing=false. \
        Booleans are written as YES/NO, arrays as comma-separated lists.")]
    #[instrument(skip_all, fields(session_id = %req.session_id, keys = req.updates.len()))]
    async fn update_config_entries(
        &self,
        Parameters(req): Parameters<UpdateConfigRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: update_config_entries");
        let updates: Result<Vec<(String, ConfigValue)>, Su2Error> = req
            .updates
            .iter()
            .map(|(key, value)| Ok((key.clone(), ConfigValue::from_json(value)?)))
            .collect();
        let updates = match updates {
            Ok(updates) => updates,
            Err(e) => return Ok(e.to_tool_result()),
        };
        match self
            .store
            .update_config(
                &req.session_id,
                &updates,
                req.create_if_missing.unwrap_or(true),
            )
            .await
        {
            Ok(updated) => Ok(json_result(&json!({ "updated_keys": updated }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Replace the session config file with the given text.")]
    #[instrument(skip_all, fields(session_id = %req.session_id, bytes = req.config_text.len()))]
    async fn set_config_text(
        &self,
        Parameters(req): Parameters<SetConfigTextRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: set_config_text");
        match self
            .store
            .write_config_text(&req.session_id, &req.config_text)
            .await
        {
            Ok(()) => Ok(json_result(&json!({
                "success": true,
                "state": self.state_of(&req.session_id).await,
            }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Upload a mesh (base64) into the session directory and set MESH_FILENAME to its file name.")]
    #[instrument(skip_all, fields(session_id = %req.session_id, file = ?req.mesh_file_name))]
    async fn set_mesh(
        &self,
        Parameters(req): Parameters<SetMeshRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: set_mesh");
        let bytes = match decode_base64("mesh_base64", &req.mesh_base64) {
            Ok(bytes) => bytes,
            Err(e) => return Ok(e.to_tool_result()),
        };
        let file_name = req
            .mesh_file_name
            .as_deref()
            .unwrap_or(DEFAULT_MESH_FILE_NAME);
        match mesh::attach_mesh_bytes(&self.store, &req.session_id, file_name, &bytes).await {
            Ok(path) => Ok(json_result(&json!({
                "mesh_path": path,
                "mesh_filename": file_name,
                "bytes": bytes.len(),
            }))),
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Run an SU2 solver (default SU2_CFD) in the session directory with the session config. \
        Killed after timeout_secs (default 600). Non-zero exit, timeout, and missing binary are reported in the result, \
        not as errors. Only one run per session at a time.")]
    #[instrument(skip(self))]
    async fn run_su2_solver(
        &self,
        Parameters(req): Parameters<RunSolverRequest>,
    ) -> Result<CallToolResult, McpError> {
        info!("Tool call: run_su2_solver");
        let tail_lines = req.log_tail_lines.unwrap_or(DEFAULT_LOG_TAIL_LINES);
        let options = RunOptions {
            solver: req.solver.unwrap_or_else(|| DEFAULT_SOLVER.to_string()),
            config_override: req.config_override,
            timeout_secs: req.timeout_secs,
            extra_args: req.extra_args.unwrap_or_default(),
            log_tail_lines: tail_lines,
        };
        match self.store.run_solver(&req.session_id, options).await {
            Ok(result) => {
                let mut report = RunReport::new(&req.session_id, &result, tail_lines);
                report.session_state = self.state_of(&req.session_id).await;
                Ok(json_result(&report))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Run SU2_DEF in the session directory to produce a deformed mesh. \
        deformed_mesh_path is set when the run succeeded and the output mesh exists.")]
    #[instrument(skip(self))]
    async fn generate_deformed_mesh(
        &self,
        Parameters(req): Parameters<DeformMeshRequest>,
    ) -> Result<CallToolResult, McpError> {
        info!("Tool call: generate_deformed_mesh");
        let options = DeformOptions {
            solver: None,
            def_config: req.def_config,
            output_mesh_name: req.output_mesh_name,
            timeout_secs: req.timeout_secs,
        };
        match self.store.deform_mesh(&req.session_id, options).await {
            Ok(outcome) => {
                let mut report =
                    RunReport::new(&req.session_id, &outcome.result, DEFAULT_LOG_TAIL_LINES);
                report.session_state = self.state_of(&req.session_id).await;
                report.deformed_mesh_path = outcome.deformed_mesh_path;
                Ok(json_result(&report))
            }
            Err(e) => Ok(e.to_tool_result()),
        }
    }

    #[tool(description = "Discover available tools by query or category. \
        Use this to find the right tool for your task before calling tool_help for full details.")]
    #[instrument(skip(self))]
    async fn tool_catalog(
        &self,
        Parameters(req): Parameters<ToolCatalogRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: tool_catalog");
        let limit = req.limit.unwrap_or(7).min(15);

        if let Some(cat) = req
            .category
            .as_deref()
            .and_then(|c| c.parse::<ToolCategory>().ok())
        {
            let tools: Vec<_> = tool_registry::tools_by_category(cat)
                .take(limit)
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.short_desc,
                        "category": t.category.as_str(),
                    })
                })
                .collect();
            return Ok(json_result(&json!({
                "category": cat.as_str(),
                "category_description": cat.description(),
                "tools": tools,
                "hint": "Use tool_help(name) for full documentation and examples"
            })));
        }

        if let Some(query) = &req.query {
            let tools: Vec<_> = tool_registry::search_tools(query, limit)
                .iter()
                .map(|(t, keywords)| {
                    json!({
                        "name": t.name,
                        "description": t.short_desc,
                        "category": t.category.as_str(),
                        "matched": keywords,
                    })
                })
                .collect();
            return Ok(json_result(&json!({
                "query": query,
                "tools": tools,
                "hint": "Use tool_help(name) for full documentation and examples"
            })));
        }

        let categories: Vec<_> = ToolCategory::all()
            .iter()
            .map(|c| {
                json!({
                    "category": c.as_str(),
                    "description": c.description(),
                    "tool_count": tool_registry::tools_by_category(*c).count(),
                })
            })
            .collect();
        Ok(json_result(&json!({
            "categories": categories,
            "hint": "Use tool_catalog(category='...') to list tools in a category, or tool_catalog(query='...') to search."
        })))
    }

    #[tool(
        description = "Get full documentation for a tool including description, parameters schema, and example."
    )]
    #[instrument(skip(self))]
    async fn tool_help(
        &self,
        Parameters(req): Parameters<ToolHelpRequest>,
    ) -> Result<CallToolResult, McpError> {
        debug!("Tool call: tool_help for {}", req.name);

        if let Some(tool) = tool_registry::get_tool(&req.name) {
            return Ok(json_result(&json!({
                "name": tool.name,
                "category": tool.category.as_str(),
                "description": tool.full_desc,
                "parameters": tool_params_schema(&req.name),
                "example": tool.example,
                "keywords": tool.keywords,
            })));
        }

        let suggestions: Vec<_> = tool_registry::search_tools(&req.name, 3)
            .iter()
            .map(|(t, _)| t.name)
            .collect();
        Ok(json_result(&json!({
            "error": format!("Tool '{}' not found", req.name),
            "suggestions": suggestions,
            "hint": "Use tool_catalog to discover available tools"
        })))
    }
}

fn tool_params_schema(name: &str) -> Option<Value> {
    fn schema<T: JsonSchema>() -> Value {
        serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| json!({}))
    }

    match name {
        // Core
        "ping" => Some(schema::<PingRequest>()),
        "tool_catalog" => Some(schema::<ToolCatalogRequest>()),
        "tool_help" => Some(schema::<ToolHelpRequest>()),

        // Session
        "create_su2_session" => Some(schema::<CreateSessionRequest>()),
        "close_su2_session" => Some(schema::<CloseSessionRequest>()),
        "get_session_info" | "get_config_text" | "parse_config" => {
            Some(schema::<SessionRequest>())
        }
        "list_sessions" => Some(schema::<EmptyParams>()),

        // Config / Mesh
        "update_config_entries" => Some(schema::<UpdateConfigRequest>()),
        "set_config_text" => Some(schema::<SetConfigTextRequest>()),
        "set_mesh" => Some(schema::<SetMeshRequest>()),

        // Run
        "run_su2_solver" => Some(schema::<RunSolverRequest>()),
        "generate_deformed_mesh" => Some(schema::<DeformMeshRequest>()),

        _ => None,
    }
}

#[tool_handler(router = self.tool_mux)]
impl ServerHandler for Su2McpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(self.instructions()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessRunner;
    use crate::settings::{RunnerSettings, StoreSettings};

    fn server_in(root: &std::path::Path) -> Su2McpServer {
        let store = SessionStore::new(
            StoreSettings::with_root(root),
            ProcessRunner::new(RunnerSettings::default()),
        )
        .unwrap();
        Su2McpServer::new(Arc::new(store))
    }

    fn body(result: &CallToolResult) -> Value {
        let text = result.content[0].as_text().unwrap().text.clone();
        serde_json::from_str(&text).unwrap()
    }

    #[test]
    fn every_registered_tool_is_routed() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_in(tmp.path());
        let listed: Vec<String> = server
            .tool_mux
            .list_all()
            .into_iter()
            .map(|t| t.name.to_string())
            .collect();
        let registered: Vec<String> = tool_registry::all_tools()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(listed, registered);
        for name in &registered {
            assert!(tool_params_schema(name).is_some(), "{name} has no schema");
        }
    }

    #[tokio::test]
    async fn create_edit_and_parse_through_tools() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_in(tmp.path());

        let created = server
            .create_su2_session(Parameters(CreateSessionRequest {
                label: Some("naca0012".into()),
                initial_config: Some("SOLVER= EULER\nMACH_NUMBER= 0.5 % inflow\n".into()),
                initial_mesh_base64: Some(STANDARD.encode("NDIME= 2\n")),
                mesh_file_name: None,
            }))
            .await
            .unwrap();
        let created = body(&created);
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["state"], "configured");

        let mut updates = serde_json::Map::new();
        updates.insert("MACH_NUMBER".into(), json!(0.8));
        updates.insert("RESTART_SOL".into(), json!(false));
        let updated = server
            .update_config_entries(Parameters(UpdateConfigRequest {
                session_id: id.clone(),
                updates,
                create_if_missing: None,
            }))
            .await
            .unwrap();
        assert_eq!(body(&updated)["updated_keys"], json!(["MACH_NUMBER", "RESTART_SOL"]));

        let text = server
            .get_config_text(Parameters(SessionRequest {
                session_id: id.clone(),
            }))
            .await
            .unwrap();
        assert_eq!(
            body(&text)["config_text"],
            "SOLVER= EULER\nMACH_NUMBER= 0.8 % inflow\nMESH_FILENAME= mesh.su2\nRESTART_SOL= NO\n"
        );

        let parsed = server
            .parse_config(Parameters(SessionRequest { session_id: id }))
            .await
            .unwrap();
        let parsed = body(&parsed);
        assert_eq!(parsed["entries"]["MACH_NUMBER"], json!(0.8));
        assert_eq!(parsed["entries"]["RESTART_SOL"], json!(false));
    }

    #[tokio::test]
    async fn core_errors_are_tool_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_in(tmp.path());

        let missing = server
            .get_session_info(Parameters(SessionRequest {
                session_id: "unknown".into(),
            }))
            .await
            .unwrap();
        assert_eq!(missing.is_error, Some(true));
        assert_eq!(body(&missing)["error"]["type"], "not_found");

        let bad_mesh = server
            .set_mesh(Parameters(SetMeshRequest {
                session_id: "unknown".into(),
                mesh_base64: "not base64!".into(),
                mesh_file_name: None,
            }))
            .await
            .unwrap();
        assert_eq!(body(&bad_mesh)["error"]["type"], "validation_error");
    }

    #[tokio::test]
    async fn missing_solver_is_a_result_not_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let server = server_in(tmp.path());
        let session = server
            .store()
            .create_session_with(CreateOptions {
                initial_config: Some("SOLVER= EULER\n".into()),
                ..CreateOptions::default()
            })
            .await
            .unwrap();

        let run = server
            .run_su2_solver(Parameters(RunSolverRequest {
                session_id: session.id,
                solver: Some("SU2_CFD_definitely_not_installed".into()),
                config_override: None,
                timeout_secs: Some(5),
                extra_args: None,
                log_tail_lines: None,
            }))
            .await
            .unwrap();
        assert_ne!(run.is_error, Some(true));
        let report = body(&run);
        assert_eq!(report["binary_missing"], true);
        assert_eq!(report["success"], false);
        assert_eq!(report["session_state"], "failed");
    }
}
