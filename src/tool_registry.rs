//! Tool registry for dynamic tool discovery.
//!
//! All tools are exposed in tools/list. `tool_catalog` and `tool_help` read
//! from this table to give clients short descriptions, full docs, and examples.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tool category for grouping related tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    /// Health check and discovery
    Core,
    /// Session lifecycle
    Session,
    /// Config reading and editing
    Config,
    /// Mesh upload
    Mesh,
    /// Solver and deformation runs
    Run,
}

impl ToolCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Session => "session",
            Self::Config => "config",
            Self::Mesh => "mesh",
            Self::Run => "run",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Core => "Connectivity check and tool discovery",
            Self::Session => "Create, inspect, list, and close isolated SU2 sessions",
            Self::Config => "Read, parse, and edit the session's SU2 .cfg file",
            Self::Mesh => "Upload a mesh into a session and point MESH_FILENAME at it",
            Self::Run => "Run SU2_CFD and SU2_DEF inside a session directory",
        }
    }

    pub fn all() -> &'static [ToolCategory] {
        &[
            Self::Core,
            Self::Session,
            Self::Config,
            Self::Mesh,
            Self::Run,
        ]
    }
}

impl FromStr for ToolCategory {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "core" | "discovery" => Ok(Self::Core),
            "session" | "sessions" => Ok(Self::Session),
            "config" | "cfg" | "configuration" => Ok(Self::Config),
            "mesh" | "grid" => Ok(Self::Mesh),
            "run" | "solver" | "solve" | "deform" => Ok(Self::Run),
            _ => Err(()),
        }
    }
}

/// Metadata for a single tool
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: &'static str,
    pub category: ToolCategory,
    /// Short description (1 line, <100 chars) - used in tool_catalog results
    pub short_desc: &'static str,
    /// Full description with usage details - used in tool_help
    pub full_desc: &'static str,
    /// Example invocation (JSON)
    pub example: &'static str,
    /// Keywords for search
    pub keywords: &'static [&'static str],
}

/// Static registry of all tools
pub static TOOL_REGISTRY: &[ToolInfo] = &[
    // === CORE ===
    ToolInfo {
        name: "ping",
        category: ToolCategory::Core,
        short_desc: "Check that the server responds",
        full_desc: "Return ok, the echoed message (default \"pong\"), the server name, and a UTC \
                    timestamp. Does not touch the filesystem or require SU2 to be installed.",
        example: r#"{"message": "hello"}"#,
        keywords: &["ping", "health", "alive", "status", "connectivity"],
    },
    ToolInfo {
        name: "tool_catalog",
        category: ToolCategory::Core,
        short_desc: "Discover tools by query or category",
        full_desc: "Search the tool table by free-text query, list one category, or list all \
                    categories when called without arguments.",
        example: r#"{"query": "change mach number"}"#,
        keywords: &["discover", "search", "catalog", "find", "tools", "list"],
    },
    ToolInfo {
        name: "tool_help",
        category: ToolCategory::Core,
        short_desc: "Full documentation for one tool",
        full_desc: "Return the description, parameter schema, and an example call for a tool.",
        example: r#"{"name": "run_su2_solver"}"#,
        keywords: &["help", "docs", "documentation", "schema", "parameters", "usage"],
    },
    // === SESSION ===
    ToolInfo {
        name: "create_su2_session",
        category: ToolCategory::Session,
        short_desc: "Create an isolated session directory",
        full_desc: "Create a new session with its own working directory under the sessions root. \
                    Optionally seed the config file with initial_config and upload a base64 mesh \
                    (initial_mesh_base64, stored as mesh_file_name, default mesh.su2; MESH_FILENAME \
                    is set accordingly). Returns the session id, directory, config path, and state. \
                    Every other tool takes the returned session_id.",
        example: r#"{"label": "naca0012", "initial_config": "SOLVER= EULER\nMACH_NUMBER= 0.8\n"}"#,
        keywords: &["create", "new", "session", "start", "workdir", "open"],
    },
    ToolInfo {
        name: "close_su2_session",
        category: ToolCategory::Session,
        short_desc: "Close a session, optionally deleting its directory",
        full_desc: "Unregister a session. Set delete_directory=true to also remove its directory \
                    and every solver output in it. Closing an unknown session returns success=false.",
        example: r#"{"session_id": "…", "delete_directory": true}"#,
        keywords: &["close", "delete", "remove", "cleanup", "session", "end"],
    },
    ToolInfo {
        name: "get_session_info",
        category: ToolCategory::Session,
        short_desc: "Session paths, state, and last run summary",
        full_desc: "Return the session directory, config path, mesh path, lifecycle state \
                    (created, configured, running, completed, failed), and a summary of the \
                    most recent run including a log tail.",
        example: r#"{"session_id": "…"}"#,
        keywords: &["info", "session", "state", "status", "last", "run", "paths"],
    },
    ToolInfo {
        name: "list_sessions",
        category: ToolCategory::Session,
        short_desc: "List open sessions in creation order",
        full_desc: "Return every open session in creation order with its state and paths.",
        example: r#"{}"#,
        keywords: &["list", "sessions", "all", "open"],
    },
    // === CONFIG ===
    ToolInfo {
        name: "get_config_text",
        category: ToolCategory::Config,
        short_desc: "Raw text of the session config file",
        full_desc: "Return the session's .cfg file exactly as stored, comments included. \
                    Empty when no config has been written yet.",
        example: r#"{"session_id": "…"}"#,
        keywords: &["config", "cfg", "read", "text", "raw", "show"],
    },
    ToolInfo {
        name: "parse_config",
        category: ToolCategory::Config,
        short_desc: "Parsed key/value entries of the session config",
        full_desc: "Parse the session config into entries in file order. Values are typed: \
                    YES/NO become booleans, numbers become numbers, comma lists and ( a, b ) \
                    groups become arrays. When a key is defined more than once the last \
                    definition wins; such keys are listed in duplicate_keys.",
        example: r#"{"session_id": "…"}"#,
        keywords: &["parse", "config", "entries", "keys", "values", "options"],
    },
    ToolInfo {
        name: "update_config_entries",
        category: ToolCategory::Config,
        short_desc: "Set config keys in place, keeping comments",
        full_desc: "Set one or more config keys. Existing keys have only their value replaced; \
                    the rest of the line, trailing comments, and all other lines stay byte-identical. \
                    Unknown keys are appended unless create_if_missing=false. Booleans are written \
                    as YES/NO and arrays as comma lists. Returns updated_keys. Waits while a run \
                    is in progress on the same session.",
        example: r#"{"session_id": "…", "updates": {"MACH_NUMBER": 0.8, "AOA": 1.25, "MARKER_EULER": "( airfoil )"}}"#,
        keywords: &["update", "set", "edit", "change", "config", "key", "value", "mach", "aoa", "cfl"],
    },
    ToolInfo {
        name: "set_config_text",
        category: ToolCategory::Config,
        short_desc: "Replace the whole config file",
        full_desc: "Replace the session config with the given text. The file is written \
                    atomically and the session becomes configured.",
        example: r#"{"session_id": "…", "config_text": "SOLVER= EULER\nMESH_FILENAME= mesh.su2\n"}"#,
        keywords: &["config", "write", "replace", "upload", "text", "set"],
    },
    // === MESH ===
    ToolInfo {
        name: "set_mesh",
        category: ToolCategory::Mesh,
        short_desc: "Upload a base64 mesh and set MESH_FILENAME",
        full_desc: "Decode mesh_base64, write it into the session directory as mesh_file_name \
                    (default mesh.su2), and set MESH_FILENAME in the config to that name. \
                    The file name must be a plain name without directories.",
        example: r#"{"session_id": "…", "mesh_base64": "TkRJTUU9IDIK", "mesh_file_name": "naca0012.su2"}"#,
        keywords: &["mesh", "grid", "upload", "su2", "file", "geometry"],
    },
    // === RUN ===
    ToolInfo {
        name: "run_su2_solver",
        category: ToolCategory::Run,
        short_desc: "Run SU2_CFD (or another solver) in the session",
        full_desc: "Run the solver with the session config (or config_override, relative to the \
                    session directory) as its first argument, inside the session directory. \
                    The process is killed after timeout_secs (default 600). Non-zero exits, \
                    timeouts, and a missing solver binary are reported in the result \
                    (exit_code, timed_out, binary_missing), not as tool errors. The session \
                    must be configured first, and only one run per session may be active.",
        example: r#"{"session_id": "…", "solver": "SU2_CFD", "timeout_secs": 1800}"#,
        keywords: &["run", "solve", "solver", "su2_cfd", "simulate", "execute", "cfd"],
    },
    ToolInfo {
        name: "generate_deformed_mesh",
        category: ToolCategory::Run,
        short_desc: "Run SU2_DEF to produce a deformed mesh",
        full_desc: "Run SU2_DEF with def_config (default: the session config) inside the session \
                    directory. deformed_mesh_path is returned when the run succeeded and the \
                    output mesh (output_mesh_name, else the config's MESH_OUT_FILENAME) exists.",
        example: r#"{"session_id": "…", "def_config": "deform.cfg", "output_mesh_name": "mesh_def.su2"}"#,
        keywords: &["deform", "su2_def", "mesh", "morph", "ffd", "shape"],
    },
];

/// Get all tools
pub fn all_tools() -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter()
}

/// Get tool by name
pub fn get_tool(name: &str) -> Option<&'static ToolInfo> {
    TOOL_REGISTRY.iter().find(|t| t.name == name)
}

/// Get tools by category
pub fn tools_by_category(category: ToolCategory) -> impl Iterator<Item = &'static ToolInfo> {
    TOOL_REGISTRY.iter().filter(move |t| t.category == category)
}

/// Search tools by free-text query.
///
/// Query words (split on anything but letters and digits) are matched whole
/// against the parts of a tool name, its keywords, and its category. A query
/// holding an SU2 option name such as `MACH_NUMBER` also favors config tools.
pub fn search_tools(query: &str, limit: usize) -> Vec<(&'static ToolInfo, Vec<&'static str>)> {
    let words: Vec<String> = query
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_lowercase)
        .collect();
    let names_option = query.split_whitespace().any(is_option_name);

    let mut ranked: Vec<_> = TOOL_REGISTRY
        .iter()
        .filter_map(|tool| {
            let (score, matched) = score_tool(tool, &words, names_option);
            (score > 0).then_some((tool, matched, score))
        })
        .collect();
    // Stable sort keeps table order among equal scores.
    ranked.sort_by(|a, b| b.2.cmp(&a.2));

    ranked
        .into_iter()
        .take(limit)
        .map(|(tool, matched, _)| (tool, matched))
        .collect()
}

fn score_tool(
    tool: &'static ToolInfo,
    words: &[String],
    names_option: bool,
) -> (usize, Vec<&'static str>) {
    let mut score = 0;
    let mut matched: Vec<&'static str> = Vec::new();
    let mut note = |label: &'static str| {
        if !matched.contains(&label) {
            matched.push(label);
        }
    };

    for word in words {
        let word = word.as_str();
        if tool.name.split('_').any(|part| part == word) {
            score += 10;
            note("name");
        }
        // Prefix hits need four letters: "simul" finds "simulate", "in" finds nothing.
        let keyword = tool
            .keywords
            .iter()
            .find(|k| **k == word || (word.len() > 3 && k.starts_with(word)));
        if let Some(keyword) = keyword {
            score += 4;
            note(*keyword);
        }
        if tool.category.as_str() == word {
            score += 2;
            note(tool.category.as_str());
        }
    }
    if names_option && tool.category == ToolCategory::Config {
        score += 3;
        note("config option");
    }
    (score, matched)
}

/// `MACH_NUMBER`, `MESH_OUT_FILENAME`, ...
fn is_option_name(word: &str) -> bool {
    word.contains('_')
        && word.chars().any(|c| c.is_ascii_uppercase())
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}
