//! Small filesystem helpers shared by the config and mesh layers.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use crate::error::Su2Error;

/// Write `bytes` to `path` via a temp file in the same directory.
///
/// The data is synced before the rename, so a reader (including a solver
/// spawned right after) never observes a partially written file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), Su2Error> {
    let parent = path
        .parent()
        .ok_or_else(|| Su2Error::InvalidPath(path.display().to_string()))?;
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = parent.join(format!(".{}.tmp.{}", name, std::process::id()));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(Su2Error::storage(path, e));
    }
    if let Ok(dir) = fs::File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

/// True when `name` is a single, normal file name component.
pub(crate) fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Join a caller-supplied relative path onto `base`, refusing anything that
/// could leave it (absolute paths, `..`, drive prefixes).
pub(crate) fn relative_within(base: &Path, rel: &str) -> Result<PathBuf, Su2Error> {
    let path = Path::new(rel);
    let mut normal = 0;
    for component in path.components() {
        match component {
            Component::Normal(_) => normal += 1,
            Component::CurDir => {}
            _ => return Err(Su2Error::InvalidPath(rel.to_string())),
        }
    }
    if normal == 0 {
        return Err(Su2Error::InvalidPath(rel.to_string()));
    }
    Ok(base.join(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_content_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("case.cfg");
        write_atomic(&path, b"A= 1\n").unwrap();
        write_atomic(&path, b"A= 2\n").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"A= 2\n");
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn plain_file_names() {
        assert!(is_plain_file_name("wing.su2"));
        assert!(!is_plain_file_name(""));
        assert!(!is_plain_file_name("."));
        assert!(!is_plain_file_name(".."));
        assert!(!is_plain_file_name("../wing.su2"));
        assert!(!is_plain_file_name("a/b.su2"));
        assert!(!is_plain_file_name("/etc/passwd"));
    }

    #[test]
    fn relative_paths_stay_inside_base() {
        let base = Path::new("/sessions/abc");
        assert_eq!(
            relative_within(base, "deform/def.cfg").unwrap(),
            base.join("deform/def.cfg")
        );
        assert_eq!(relative_within(base, "./case.cfg").unwrap(), base.join("./case.cfg"));
        for bad in ["", ".", "../x.cfg", "a/../../x", "/etc/passwd"] {
            assert!(relative_within(base, bad).is_err(), "{bad:?} accepted");
        }
    }
}
