//! Locating solver executables.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// Resolve `name` to an executable path.
///
/// Names containing a path separator are taken as paths (relative ones are
/// joined onto `base`); bare names are searched in `PATH`.
pub fn resolve_binary(name: &str, base: &Path) -> Option<PathBuf> {
    resolve_in(name, base, std::env::var_os("PATH").as_deref())
}

pub(crate) fn resolve_in(name: &str, base: &Path, path_var: Option<&OsStr>) -> Option<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        let candidate = crate::expand_path(name);
        let candidate = if candidate.is_absolute() {
            candidate
        } else {
            base.join(candidate)
        };
        return is_executable(&candidate).then_some(candidate);
    }

    let path_var = path_var?;
    std::env::split_paths(path_var)
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}
