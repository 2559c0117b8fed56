//! SU2 configuration files.
//!
//! SU2 reads a flat `KEY= VALUE` text format where `%` starts a comment.
//! [`ConfigDocument`] keeps every original line so edits touch only the lines
//! they target; [`ConfigValue`] is the typed view of a single value.

mod document;
mod value;

pub use document::{ConfigDocument, COMMENT_MARKERS};
pub use value::ConfigValue;

/// Config key SU2 reads the mesh file name from.
pub const MESH_FILENAME_KEY: &str = "MESH_FILENAME";
/// Config key SU2_DEF writes the deformed mesh to.
pub const MESH_OUT_FILENAME_KEY: &str = "MESH_OUT_FILENAME";
/// File name SU2_DEF uses when `MESH_OUT_FILENAME` is not set.
pub const DEFAULT_MESH_OUT_FILENAME: &str = "mesh_out.su2";
