//! Session store: one private directory per session, one lock per session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info, instrument, warn};

use super::id::{generate_session_id, sanitize_label, validate_session_id};
use super::types::{
    CreateOptions, DeformOptions, DeformOutcome, LastRun, RunOptions, Session, SessionState,
    DEFORM_SOLVER,
};
use crate::config::{
    ConfigDocument, ConfigValue, DEFAULT_MESH_OUT_FILENAME, MESH_OUT_FILENAME_KEY,
};
use crate::error::Su2Error;
use crate::fs_util::{is_plain_file_name, relative_within};
use crate::process::{ProcessResult, ProcessRunner};
use crate::settings::StoreSettings;

/// Registry entry for one session.
struct SessionSlot {
    /// Creation order, used for listing.
    seq: u64,
    /// Current metadata. Readable at any time, including during a run.
    info: std::sync::RwLock<Session>,
    /// Serializes every operation that touches the session directory.
    op_lock: Arc<Mutex<()>>,
    /// Number of runs started, bumped after the state turns RUNNING.
    runs: AtomicU64,
}

impl SessionSlot {
    fn snapshot(&self) -> Session {
        self.read(Session::clone)
    }

    fn read<T>(&self, f: impl FnOnce(&Session) -> T) -> T {
        let info = self.info.read().unwrap_or_else(|e| e.into_inner());
        f(&info)
    }

    fn update<T>(&self, f: impl FnOnce(&mut Session) -> T) -> T {
        let mut info = self.info.write().unwrap_or_else(|e| e.into_inner());
        f(&mut info)
    }
}

/// Exclusive access to one session for the duration of an operation.
pub(crate) struct SessionGuard {
    slot: Arc<SessionSlot>,
    _lock: OwnedMutexGuard<()>,
}

impl SessionGuard {
    pub(crate) fn snapshot(&self) -> Session {
        self.slot.snapshot()
    }

    pub(crate) fn id(&self) -> String {
        self.slot.read(|s| s.id.clone())
    }

    pub(crate) fn directory(&self) -> PathBuf {
        self.slot.read(|s| s.directory.clone())
    }

    pub(crate) fn config_path(&self) -> PathBuf {
        self.slot.read(|s| s.config_path.clone())
    }

    /// Load the session config; a config that was never written is empty.
    pub(crate) fn load_config(&self) -> Result<ConfigDocument, Su2Error> {
        let path = self.config_path();
        if path.exists() {
            ConfigDocument::load(&path)
        } else {
            Ok(ConfigDocument::new())
        }
    }

    /// Persist the session config and mark the session configured.
    pub(crate) fn save_config(&self, doc: &ConfigDocument) -> Result<(), Su2Error> {
        doc.save(&self.config_path())?;
        self.slot.update(|s| s.state = SessionState::Configured);
        Ok(())
    }

    pub(crate) fn set_mesh_path(&self, path: PathBuf) {
        self.slot.update(|s| s.mesh_path = Some(path));
    }
}

/// Flags a session RUNNING and guarantees it leaves that state again, even
/// when the run future is dropped before it records an outcome.
struct RunningMark {
    slot: Arc<SessionSlot>,
    finished: bool,
}

impl RunningMark {
    fn start(slot: &Arc<SessionSlot>) -> Self {
        slot.update(|s| s.state = SessionState::Running);
        slot.runs.fetch_add(1, Ordering::SeqCst);
        Self {
            slot: Arc::clone(slot),
            finished: false,
        }
    }

    fn finish(mut self, state: SessionState, last_run: Option<LastRun>) {
        self.finished = true;
        self.slot.update(|s| {
            s.state = state;
            if last_run.is_some() {
                s.last_run = last_run;
            }
        });
    }
}

impl Drop for RunningMark {
    fn drop(&mut self) {
        if !self.finished {
            self.slot.update(|s| s.state = SessionState::Failed);
        }
    }
}

/// Owner of every session and its directory under one sessions root.
///
/// The id map is behind a short-held lock used only for insert, remove, and
/// lookup. Work inside a session directory runs under that session's own
/// lock, so different sessions proceed in parallel while operations on one
/// session are serialized. A run requested while the session is RUNNING is
/// rejected with [`Su2Error::SessionBusy`]; everything else waits its turn.
pub struct SessionStore {
    settings: StoreSettings,
    /// Canonical sessions root; every session directory is a direct child.
    root: PathBuf,
    runner: ProcessRunner,
    sessions: RwLock<HashMap<String, Arc<SessionSlot>>>,
    next_seq: AtomicU64,
}

impl SessionStore {
    /// Create the sessions root if needed and open an empty store over it.
    pub fn new(settings: StoreSettings, runner: ProcessRunner) -> Result<Self, Su2Error> {
        if !is_plain_file_name(&settings.config_file_name) {
            return Err(Su2Error::InvalidParams(format!(
                "config file name must be a plain file name: {}",
                settings.config_file_name
            )));
        }
        let requested = &settings.sessions_root;
        std::fs::create_dir_all(requested).map_err(|e| Su2Error::storage(requested, e))?;
        let root = requested
            .canonicalize()
            .map_err(|e| Su2Error::storage(requested, e))?;
        info!(root = %root.display(), "Session store ready");

        Ok(Self {
            runner: runner.confined_to(&root),
            root,
            settings,
            sessions: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn runner(&self) -> &ProcessRunner {
        &self.runner
    }

    /// Create an empty session.
    pub async fn create_session(&self) -> Result<Session, Su2Error> {
        self.create_session_with(CreateOptions::default()).await
    }

    /// Create a session, optionally seeding its config and mesh.
    ///
    /// If seeding fails the session is closed and its directory removed.
    #[instrument(skip(self, options), fields(label = ?options.label))]
    pub async fn create_session_with(&self, options: CreateOptions) -> Result<Session, Su2Error> {
        let id = generate_session_id();
        let directory = self.session_dir(&id)?;
        // create_dir (not create_dir_all) so an existing directory is never reused.
        std::fs::create_dir(&directory).map_err(|e| Su2Error::storage(&directory, e))?;

        let session = Session {
            id: id.clone(),
            label: options.label.as_deref().and_then(sanitize_label),
            config_path: directory.join(&self.settings.config_file_name),
            directory,
            mesh_path: None,
            state: SessionState::Created,
            created_at: Utc::now(),
            last_run: None,
        };
        let slot = Arc::new(SessionSlot {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            info: std::sync::RwLock::new(session),
            op_lock: Arc::new(Mutex::new(())),
            runs: AtomicU64::new(0),
        });
        self.sessions.write().await.insert(id.clone(), slot);
        info!(session_id = %id, "Created session");

        if let Err(e) = self.seed(&id, options).await {
            warn!(session_id = %id, error = %e, "Session setup failed, removing");
            if let Err(cleanup) = self.close_session(&id, true).await {
                warn!(session_id = %id, error = %cleanup, "Failed to remove session");
            }
            return Err(e);
        }
        self.get_session(&id).await
    }

    async fn seed(&self, id: &str, options: CreateOptions) -> Result<(), Su2Error> {
        if let Some(text) = options.initial_config {
            self.write_config_text(id, &text).await?;
        }
        if let Some((file_name, bytes)) = options.initial_mesh {
            crate::mesh::attach_mesh_bytes(self, id, &file_name, &bytes).await?;
        }
        Ok(())
    }

    /// Snapshot of one session.
    pub async fn get_session(&self, id: &str) -> Result<Session, Su2Error> {
        Ok(self.slot(id).await?.snapshot())
    }

    /// Snapshots of all sessions in creation order.
    pub async fn list_sessions(&self) -> Vec<Session> {
        let mut slots: Vec<Arc<SessionSlot>> = self.sessions.read().await.values().cloned().collect();
        slots.sort_by_key(|s| s.seq);
        slots.iter().map(|s| s.snapshot()).collect()
    }

    /// Unregister a session, optionally removing its directory.
    ///
    /// Waits for any in-flight operation on the session. Returns `false` for
    /// an unknown id unless `strict_delete` is set, in which case that is
    /// [`Su2Error::SessionNotFound`].
    #[instrument(skip(self))]
    pub async fn close_session(&self, id: &str, delete_directory: bool) -> Result<bool, Su2Error> {
        let guard = match self.lock(id).await {
            Ok(guard) => guard,
            Err(Su2Error::SessionNotFound(_)) if !self.settings.strict_delete => {
                debug!(session_id = %id, "Close of unknown session ignored");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        // The session stays registered if its directory cannot be removed.
        if delete_directory {
            self.remove_session_dir(&guard.directory())?;
        }
        self.sessions.write().await.remove(id);
        info!(session_id = %id, deleted = delete_directory, "Closed session");
        Ok(true)
    }

    /// Unregister a session and remove its directory.
    pub async fn delete_session(&self, id: &str) -> Result<bool, Su2Error> {
        self.close_session(id, true).await
    }

    /// Close every session; directories are removed when `cleanup_on_shutdown` is set.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self
            .list_sessions()
            .await
            .into_iter()
            .map(|s| s.id)
            .collect();
        let delete = self.settings.cleanup_on_shutdown;
        for id in &ids {
            if let Err(e) = self.close_session(id, delete).await {
                warn!(session_id = %id, error = %e, "Failed to close session on shutdown");
            }
        }
        info!(count = ids.len(), deleted = delete, "Closed all sessions");
    }

    /// Current config text; empty when no config has been written.
    pub async fn read_config_text(&self, id: &str) -> Result<String, Su2Error> {
        Ok(self.load_config(id).await?.to_text())
    }

    /// Parsed session config; empty when no config has been written.
    pub async fn load_config(&self, id: &str) -> Result<ConfigDocument, Su2Error> {
        self.lock(id).await?.load_config()
    }

    /// Replace the whole config file.
    pub async fn write_config_text(&self, id: &str, text: &str) -> Result<(), Su2Error> {
        let doc = ConfigDocument::parse(text);
        let guard = self.lock(id).await?;
        guard.save_config(&doc)?;
        debug!(session_id = %id, lines = doc.line_count(), "Wrote config text");
        Ok(())
    }

    /// Set config entries in request order and save once.
    ///
    /// Keys not yet defined are skipped unless `create_if_missing`. Returns
    /// the keys actually written. Nothing is saved if any update is rejected,
    /// and an update that writes no key leaves the file and state alone.
    pub async fn update_config(
        &self,
        id: &str,
        updates: &[(String, ConfigValue)],
        create_if_missing: bool,
    ) -> Result<Vec<String>, Su2Error> {
        let guard = self.lock(id).await?;
        let mut doc = guard.load_config()?;
        let mut written = Vec::with_capacity(updates.len());
        for (key, value) in updates {
            if create_if_missing || doc.contains_key(key) {
                doc.set(key, value.clone())?;
                written.push(key.clone());
            }
        }
        if written.is_empty() {
            debug!(session_id = %id, "No config keys matched, nothing written");
        } else {
            guard.save_config(&doc)?;
        }
        Ok(written)
    }

    /// Run a solver inside the session directory.
    ///
    /// Solver failures come back as data in the [`ProcessResult`]; the
    /// session ends COMPLETED or FAILED accordingly.
    #[instrument(skip(self, options), fields(solver = %options.solver))]
    pub async fn run_solver(
        &self,
        id: &str,
        options: RunOptions,
    ) -> Result<ProcessResult, Su2Error> {
        let guard = self.lock_for_run(id).await?;
        self.run_locked(&guard, &options).await
    }

    /// Run `SU2_DEF` and report the deformed mesh when it was produced.
    #[instrument(skip(self, options))]
    pub async fn deform_mesh(
        &self,
        id: &str,
        options: DeformOptions,
    ) -> Result<DeformOutcome, Su2Error> {
        let guard = self.lock_for_run(id).await?;
        let directory = guard.directory();
        let config_rel = options
            .def_config
            .unwrap_or_else(|| self.settings.config_file_name.clone());

        let output_name = match options.output_mesh_name {
            Some(name) => name,
            None => {
                let path = relative_within(&directory, &config_rel)?;
                let doc = if path.is_file() {
                    ConfigDocument::load(&path)?
                } else {
                    ConfigDocument::new()
                };
                doc.get_raw(MESH_OUT_FILENAME_KEY)
                    .map(str::to_string)
                    .unwrap_or_else(|| DEFAULT_MESH_OUT_FILENAME.to_string())
            }
        };
        if !is_plain_file_name(&output_name) {
            return Err(Su2Error::InvalidPath(output_name));
        }

        let run = RunOptions {
            solver: options
                .solver
                .unwrap_or_else(|| DEFORM_SOLVER.to_string()),
            config_override: Some(config_rel),
            timeout_secs: options.timeout_secs,
            ..RunOptions::default()
        };
        let result = self.run_locked(&guard, &run).await?;
        let output = directory.join(&output_name);
        let deformed_mesh_path = (result.succeeded() && output.is_file()).then_some(output);
        Ok(DeformOutcome {
            result,
            deformed_mesh_path,
        })
    }

    async fn run_locked(
        &self,
        guard: &SessionGuard,
        options: &RunOptions,
    ) -> Result<ProcessResult, Su2Error> {
        let session = guard.snapshot();
        if !session.state.can_run() {
            return Err(Su2Error::InvalidState {
                id: session.id,
                state: session.state.to_string(),
                operation: "run",
            });
        }

        let config_rel = options
            .config_override
            .clone()
            .unwrap_or_else(|| self.settings.config_file_name.clone());
        if !relative_within(&session.directory, &config_rel)?.is_file() {
            return Err(Su2Error::InvalidPath(format!(
                "config file not found in session: {config_rel}"
            )));
        }
        let mut args = Vec::with_capacity(options.extra_args.len() + 1);
        args.push(config_rel.clone());
        args.extend(options.extra_args.iter().cloned());
        let timeout_secs = self.runner.settings().effective_timeout(options.timeout_secs);

        let mark = RunningMark::start(&guard.slot);
        info!(
            session_id = %session.id,
            solver = %options.solver,
            config = %config_rel,
            timeout_secs,
            "Starting solver run"
        );
        match self
            .runner
            .run(&options.solver, &args, &session.directory, timeout_secs)
            .await
        {
            Ok(result) => {
                let state = if result.succeeded() {
                    SessionState::Completed
                } else {
                    SessionState::Failed
                };
                let last_run = LastRun::from_result(&result, &config_rel, options.log_tail_lines);
                mark.finish(state, Some(last_run));
                info!(
                    session_id = %session.id,
                    exit_code = ?result.exit_code,
                    timed_out = result.timed_out,
                    binary_missing = result.binary_missing,
                    state = %state,
                    "Solver run finished"
                );
                Ok(result)
            }
            Err(e) => {
                mark.finish(SessionState::Failed, None);
                Err(e)
            }
        }
    }

    fn session_dir(&self, id: &str) -> Result<PathBuf, Su2Error> {
        Ok(self.root.join(validate_session_id(id)?))
    }

    async fn slot(&self, id: &str) -> Result<Arc<SessionSlot>, Su2Error> {
        validate_session_id(id)?;
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Su2Error::SessionNotFound(id.to_string()))
    }

    /// Wait for exclusive access to a session.
    pub(crate) async fn lock(&self, id: &str) -> Result<SessionGuard, Su2Error> {
        let slot = self.slot(id).await?;
        let lock = Arc::clone(&slot.op_lock).lock_owned().await;
        self.registered(id, slot, lock).await
    }

    /// Wait for the session lock to start a run.
    ///
    /// Fails with [`Su2Error::SessionBusy`] when the session is RUNNING, or
    /// when another run started while this one waited for the lock.
    async fn lock_for_run(&self, id: &str) -> Result<SessionGuard, Su2Error> {
        let slot = self.slot(id).await?;
        let runs = slot.runs.load(Ordering::SeqCst);
        if slot.read(|s| s.state) == SessionState::Running {
            return Err(Su2Error::SessionBusy(id.to_string()));
        }
        let lock = Arc::clone(&slot.op_lock).lock_owned().await;
        if slot.runs.load(Ordering::SeqCst) != runs {
            return Err(Su2Error::SessionBusy(id.to_string()));
        }
        self.registered(id, slot, lock).await
    }

    /// The session may have been closed while we waited for its lock.
    async fn registered(
        &self,
        id: &str,
        slot: Arc<SessionSlot>,
        lock: OwnedMutexGuard<()>,
    ) -> Result<SessionGuard, Su2Error> {
        let current = self.sessions.read().await.get(id).cloned();
        match current {
            Some(current) if Arc::ptr_eq(&current, &slot) => Ok(SessionGuard { slot, _lock: lock }),
            _ => Err(Su2Error::SessionNotFound(id.to_string())),
        }
    }

    /// Remove a session directory, refusing anything that is not a real
    /// directory directly under the root.
    fn remove_session_dir(&self, directory: &Path) -> Result<(), Su2Error> {
        if directory.parent() != Some(self.root.as_path()) {
            return Err(Su2Error::InvalidPath(directory.display().to_string()));
        }
        match std::fs::symlink_metadata(directory) {
            Ok(meta) if meta.is_dir() => {
                std::fs::remove_dir_all(directory).map_err(|e| Su2Error::storage(directory, e))
            }
            Ok(_) => Err(Su2Error::InvalidPath(format!(
                "not a session directory: {}",
                directory.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Su2Error::storage(directory, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::RunnerSettings;
    use std::time::Duration;

    fn store_in(root: &Path) -> SessionStore {
        SessionStore::new(
            StoreSettings::with_root(root.join("sessions")),
            ProcessRunner::new(RunnerSettings::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn create_get_list_in_creation_order() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();
        let c = store.create_session().await.unwrap();

        assert_eq!(a.state, SessionState::Created);
        assert!(a.directory.is_dir());
        assert_eq!(a.directory.parent(), Some(store.root()));
        assert_ne!(a.directory, b.directory);

        let ids: Vec<String> = store.list_sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![a.id.clone(), b.id, c.id]);
        assert_eq!(store.get_session(&a.id).await.unwrap().id, a.id);
    }

    #[tokio::test]
    async fn unknown_and_malicious_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());

        assert!(matches!(
            store.get_session("nope").await,
            Err(Su2Error::SessionNotFound(_))
        ));
        for bad in ["..", "../sessions", "/tmp", "a/b"] {
            assert!(matches!(
                store.delete_session(bad).await,
                Err(Su2Error::InvalidSessionId(_))
            ));
        }
        assert!(tmp.path().join("sessions").is_dir());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();
        std::fs::write(s.directory.join("restart.dat"), b"x").unwrap();

        assert!(store.delete_session(&s.id).await.unwrap());
        assert!(!s.directory.exists());
        assert!(!store.delete_session(&s.id).await.unwrap());
        assert!(!store.delete_session("never-existed").await.unwrap());
        assert!(store.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn strict_delete_reports_unknown_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = StoreSettings {
            strict_delete: true,
            ..StoreSettings::with_root(tmp.path())
        };
        let store = SessionStore::new(settings, ProcessRunner::new(RunnerSettings::default())).unwrap();
        assert!(matches!(
            store.delete_session("gone").await,
            Err(Su2Error::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn close_can_keep_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();

        assert!(store.close_session(&s.id, false).await.unwrap());
        assert!(s.directory.is_dir());
        assert!(store.get_session(&s.id).await.is_err());
    }

    #[tokio::test]
    async fn config_writes_are_isolated_per_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();

        store
            .write_config_text(&a.id, "SOLVER= EULER\nMACH_NUMBER= 0.5 % inflow\n")
            .await
            .unwrap();
        assert_eq!(store.get_session(&a.id).await.unwrap().state, SessionState::Configured);
        assert_eq!(store.get_session(&b.id).await.unwrap().state, SessionState::Created);
        assert_eq!(store.read_config_text(&b.id).await.unwrap(), "");

        let written = store
            .update_config(
                &a.id,
                &[
                    ("MACH_NUMBER".to_string(), ConfigValue::Float(0.8)),
                    ("NEW_KEY".to_string(), ConfigValue::Int(3)),
                ],
                false,
            )
            .await
            .unwrap();
        assert_eq!(written, vec!["MACH_NUMBER".to_string()]);
        assert_eq!(
            store.read_config_text(&a.id).await.unwrap(),
            "SOLVER= EULER\nMACH_NUMBER= 0.8 % inflow\n"
        );
    }

    #[tokio::test]
    async fn rejected_update_leaves_file_untouched() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "A= 1\n").await.unwrap();

        let result = store
            .update_config(
                &s.id,
                &[
                    ("A".to_string(), ConfigValue::Int(2)),
                    ("BAD KEY".to_string(), ConfigValue::Int(3)),
                ],
                true,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.read_config_text(&s.id).await.unwrap(), "A= 1\n");
    }

    #[tokio::test]
    async fn create_with_initial_config_and_label() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store
            .create_session_with(CreateOptions {
                label: Some("naca 0012".into()),
                initial_config: Some("SOLVER= EULER\n".into()),
                initial_mesh: None,
            })
            .await
            .unwrap();
        assert_eq!(s.label.as_deref(), Some("naca_0012"));
        assert_eq!(s.state, SessionState::Configured);
        assert_eq!(std::fs::read_to_string(&s.config_path).unwrap(), "SOLVER= EULER\n");
    }

    #[tokio::test]
    async fn failed_seed_removes_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let result = store
            .create_session_with(CreateOptions {
                initial_mesh: Some(("../escape.su2".into(), b"NDIME= 2\n".to_vec())),
                ..CreateOptions::default()
            })
            .await;
        assert!(matches!(result, Err(Su2Error::InvalidPath(_))));
        assert!(store.list_sessions().await.is_empty());
        assert_eq!(std::fs::read_dir(store.root()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn created_session_cannot_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();
        let err = store.run_solver(&s.id, RunOptions::default()).await.unwrap_err();
        assert!(matches!(err, Su2Error::InvalidState { .. }));
    }

    #[tokio::test]
    async fn config_override_must_stay_inside_session() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "A= 1\n").await.unwrap();
        let options = RunOptions {
            config_override: Some("../other/case.cfg".into()),
            ..RunOptions::default()
        };
        assert!(matches!(
            store.run_solver(&s.id, options).await,
            Err(Su2Error::InvalidPath(_))
        ));
    }

    #[tokio::test]
    async fn missing_solver_marks_session_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "SOLVER= EULER\n").await.unwrap();

        let result = store
            .run_solver(
                &s.id,
                RunOptions {
                    solver: "SU2_CFD_definitely_not_installed".into(),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(result.binary_missing);

        let after = store.get_session(&s.id).await.unwrap();
        assert_eq!(after.state, SessionState::Failed);
        let last = after.last_run.unwrap();
        assert!(last.binary_missing);
        assert_eq!(last.config_used, "case.cfg");
    }

    #[cfg(unix)]
    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_run_completes_and_records_last_run() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let solver = write_script(
            tmp.path(),
            "fake_su2",
            "echo \"config=$1\"; echo done > history.csv",
        );
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "SOLVER= EULER\n").await.unwrap();

        let result = store
            .run_solver(
                &s.id,
                RunOptions {
                    solver: solver.display().to_string(),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout.trim(), "config=case.cfg");
        assert!(s.directory.join("history.csv").is_file());

        let after = store.get_session(&s.id).await.unwrap();
        assert_eq!(after.state, SessionState::Completed);
        assert_eq!(after.last_run.unwrap().log_tail, "config=case.cfg");

        // A finished session can be reconfigured and run again.
        store.write_config_text(&s.id, "SOLVER= NAVIER_STOKES\n").await.unwrap();
        assert_eq!(store.get_session(&s.id).await.unwrap().state, SessionState::Configured);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_marks_failed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let solver = write_script(tmp.path(), "diverges", "echo 'NaN residual' >&2; exit 3");
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "A= 1\n").await.unwrap();

        let result = store
            .run_solver(
                &s.id,
                RunOptions {
                    solver: solver.display().to_string(),
                    ..RunOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(result.exit_code, Some(3));
        let after = store.get_session(&s.id).await.unwrap();
        assert_eq!(after.state, SessionState::Failed);
        assert_eq!(after.last_run.unwrap().exit_code, Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn second_run_is_busy_and_other_ops_wait() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(tmp.path()));
        let solver = write_script(tmp.path(), "slow", "sleep 1");
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "A= 1\n").await.unwrap();

        let options = RunOptions {
            solver: solver.display().to_string(),
            ..RunOptions::default()
        };
        let first = {
            let store = Arc::clone(&store);
            let id = s.id.clone();
            let options = options.clone();
            tokio::spawn(async move { store.run_solver(&id, options).await })
        };
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(store.get_session(&s.id).await.unwrap().state, SessionState::Running);
        assert!(matches!(
            store.run_solver(&s.id, options).await,
            Err(Su2Error::SessionBusy(_))
        ));

        // Queued behind the run; observes the finished state.
        store.write_config_text(&s.id, "A= 2\n").await.unwrap();
        assert!(first.await.unwrap().unwrap().succeeded());
        let after = store.get_session(&s.id).await.unwrap();
        assert_eq!(after.state, SessionState::Configured);
        assert!(after.last_run.is_some());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deform_reports_output_mesh() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let def = write_script(tmp.path(), "fake_def", "echo deformed > mesh_def.su2");
        let s = store.create_session().await.unwrap();
        store
            .write_config_text(&s.id, "MESH_OUT_FILENAME= mesh_def.su2\n")
            .await
            .unwrap();

        let outcome = store
            .deform_mesh(
                &s.id,
                DeformOptions {
                    solver: Some(def.display().to_string()),
                    ..DeformOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(outcome.result.succeeded());
        assert_eq!(
            outcome.deformed_mesh_path,
            Some(s.directory.join("mesh_def.su2"))
        );

        let missing = store
            .deform_mesh(
                &s.id,
                DeformOptions {
                    solver: Some("SU2_DEF_definitely_not_installed".into()),
                    output_mesh_name: Some("other.su2".into()),
                    ..DeformOptions::default()
                },
            )
            .await
            .unwrap();
        assert!(missing.result.binary_missing);
        assert!(missing.deformed_mesh_path.is_none());
    }

    #[tokio::test]
    async fn shutdown_removes_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();
        store.shutdown_all().await;
        assert!(store.list_sessions().await.is_empty());
        assert!(!a.directory.exists());
        assert!(!b.directory.exists());
    }

    #[tokio::test]
    async fn update_without_matching_keys_changes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();

        let written = store
            .update_config(
                &s.id,
                &[("MACH_NUMBER".to_string(), ConfigValue::Float(0.8))],
                false,
            )
            .await
            .unwrap();
        assert!(written.is_empty());
        assert!(!s.config_path.exists());
        assert_eq!(store.get_session(&s.id).await.unwrap().state, SessionState::Created);
        assert!(matches!(
            store.run_solver(&s.id, RunOptions::default()).await,
            Err(Su2Error::InvalidState { .. })
        ));
    }

    fn missing_solver() -> RunOptions {
        RunOptions {
            solver: "SU2_CFD_definitely_not_installed".into(),
            ..RunOptions::default()
        }
    }

    #[tokio::test]
    async fn run_waits_behind_other_operations() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(tmp.path()));
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "A= 1\n").await.unwrap();

        let guard = store.lock(&s.id).await.unwrap();
        let run = {
            let store = Arc::clone(&store);
            let id = s.id.clone();
            tokio::spawn(async move { store.run_solver(&id, missing_solver()).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!run.is_finished());
        assert_eq!(store.get_session(&s.id).await.unwrap().state, SessionState::Configured);

        drop(guard);
        let result = run.await.unwrap().unwrap();
        assert!(result.binary_missing);
    }

    #[tokio::test]
    async fn runs_queued_together_start_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(store_in(tmp.path()));
        let s = store.create_session().await.unwrap();
        store.write_config_text(&s.id, "A= 1\n").await.unwrap();

        let guard = store.lock(&s.id).await.unwrap();
        let spawn_run = || {
            let store = Arc::clone(&store);
            let id = s.id.clone();
            tokio::spawn(async move { store.run_solver(&id, missing_solver()).await })
        };
        let (first, second) = (spawn_run(), spawn_run());
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(guard);

        let outcomes = [first.await.unwrap(), second.await.unwrap()];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(outcomes
            .iter()
            .any(|r| matches!(r, Err(Su2Error::SessionBusy(_)))));
    }

    #[tokio::test]
    async fn failed_directory_removal_keeps_session_registered() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let s = store.create_session().await.unwrap();
        std::fs::remove_dir(&s.directory).unwrap();
        std::fs::write(&s.directory, b"not a directory").unwrap();

        assert!(matches!(
            store.delete_session(&s.id).await,
            Err(Su2Error::InvalidPath(_))
        ));
        assert_eq!(store.get_session(&s.id).await.unwrap().id, s.id);

        std::fs::remove_file(&s.directory).unwrap();
        std::fs::create_dir(&s.directory).unwrap();
        assert!(store.delete_session(&s.id).await.unwrap());
        assert!(!s.directory.exists());
        assert!(store.list_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn deleting_one_session_leaves_others_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let a = store.create_session().await.unwrap();
        let b = store.create_session().await.unwrap();
        for (s, tag) in [(&a, "a"), (&b, "b")] {
            store
                .write_config_text(&s.id, &format!("TAG= {tag}\n"))
                .await
                .unwrap();
            std::fs::write(s.directory.join("restart.dat"), tag).unwrap();
        }

        assert!(store.delete_session(&a.id).await.unwrap());
        assert!(!a.directory.exists());
        assert!(matches!(
            store.get_session(&a.id).await,
            Err(Su2Error::SessionNotFound(_))
        ));

        assert_eq!(
            std::fs::read_to_string(b.directory.join("restart.dat")).unwrap(),
            "b"
        );
        let after = store.get_session(&b.id).await.unwrap();
        assert_eq!(after.state, SessionState::Configured);
        assert_eq!(after.directory, b.directory);
        assert_eq!(store.read_config_text(&b.id).await.unwrap(), "TAG= b\n");
        let ids: Vec<String> = store.list_sessions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b.id]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn deform_output_name_may_be_numeric() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store_in(tmp.path());
        let def = write_script(tmp.path(), "fake_def", "echo deformed > 2024");
        let s = store.create_session().await.unwrap();
        store
            .write_config_text(&s.id, "MESH_OUT_FILENAME= 2024\n")
            .await
            .unwrap();

        let outcome = store
            .deform_mesh(
                &s.id,
                DeformOptions {
                    solver: Some(def.display().to_string()),
                    ..DeformOptions::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.deformed_mesh_path, Some(s.directory.join("2024")));
    }
}
