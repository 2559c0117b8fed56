//! Mesh attachment: put a mesh file into a session and point the config at it.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::MESH_FILENAME_KEY;
use crate::error::Su2Error;
use crate::fs_util::{is_plain_file_name, write_atomic};
use crate::session::{SessionGuard, SessionStore};

/// Copy `source` into the session directory and set `MESH_FILENAME`.
///
/// The copy is named `file_name`, or the source's own file name when absent.
/// The config entry is relative, since the solver runs inside the session
/// directory. Returns the absolute path of the copy.
pub async fn attach_mesh(
    store: &SessionStore,
    id: &str,
    source: &Path,
    file_name: Option<&str>,
) -> Result<PathBuf, Su2Error> {
    let name = match file_name {
        Some(name) => name.to_string(),
        None => source
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| Su2Error::InvalidPath(source.display().to_string()))?,
    };
    check_name(store, &name)?;

    let guard = store.lock(id).await?;
    let mut doc = guard.load_config()?;
    let target = guard.directory().join(&name);

    // Copy beside the target and rename so the solver never sees a partial mesh.
    let partial = guard.directory().join(format!(".{name}.part"));
    if let Err(e) = tokio::fs::copy(source, &partial).await {
        let _ = tokio::fs::remove_file(&partial).await;
        return Err(Su2Error::storage(source, e));
    }
    tokio::fs::rename(&partial, &target)
        .await
        .map_err(|e| Su2Error::storage(&target, e))?;

    doc.set(MESH_FILENAME_KEY, name.as_str())?;
    finish(&guard, &doc, target, source.display())
}

/// Write uploaded mesh bytes into the session directory and set `MESH_FILENAME`.
pub async fn attach_mesh_bytes(
    store: &SessionStore,
    id: &str,
    file_name: &str,
    bytes: &[u8],
) -> Result<PathBuf, Su2Error> {
    check_name(store, file_name)?;

    let guard = store.lock(id).await?;
    let mut doc = guard.load_config()?;
    let target = guard.directory().join(file_name);
    write_atomic(&target, bytes)?;

    doc.set(MESH_FILENAME_KEY, file_name)?;
    finish(&guard, &doc, target, format!("{} uploaded bytes", bytes.len()))
}

fn check_name(store: &SessionStore, name: &str) -> Result<(), Su2Error> {
    if !is_plain_file_name(name) {
        return Err(Su2Error::InvalidPath(format!(
            "mesh file name must be a plain file name: {name:?}"
        )));
    }
    if name == store.settings().config_file_name {
        return Err(Su2Error::InvalidPath(format!(
            "mesh file name collides with the session config: {name:?}"
        )));
    }
    Ok(())
}

fn finish(
    guard: &SessionGuard,
    doc: &crate::config::ConfigDocument,
    target: PathBuf,
    from: impl std::fmt::Display,
) -> Result<PathBuf, Su2Error> {
    guard.save_config(doc)?;
    guard.set_mesh_path(target.clone());
    info!(session_id = %guard.id(), mesh = %target.display(), from = %from, "Attached mesh");
    Ok(target)
}
