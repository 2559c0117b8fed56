//! Isolated solver sessions.
//!
//! Every session owns one directory directly under the sessions root:
//!
//! ```text
//! <sessions_root>/
//! ├── 5b0c…-a1/          session A
//! │   ├── case.cfg       solver config (ConfigDocument)
//! │   ├── wing.su2       attached mesh
//! │   └── history.csv    solver output
//! └── 9e41…-07/          session B
//! ```
//!
//! Identifiers are generated UUIDs and are validated before they are joined
//! onto the root, so no caller-supplied id can reach outside it.

mod id;
mod store;
mod types;

pub(crate) use store::SessionGuard;

pub use id::{generate_session_id, sanitize_label, validate_session_id};
pub use store::SessionStore;
pub use types::{
    CreateOptions, DeformOptions, DeformOutcome, LastRun, RunOptions, Session, SessionState,
    DEFAULT_LOG_TAIL_LINES, DEFAULT_SOLVER, DEFORM_SOLVER,
};
