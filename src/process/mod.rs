//! Running the external SU2 executables.

mod capture;
mod resolve;
mod runner;

pub use resolve::resolve_binary;
pub use runner::{ProcessResult, ProcessRunner};
