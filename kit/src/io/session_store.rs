//! Team session store: lifecycle of the current session plus on-disk persistence.
//!
//! Mutations mark the current session dirty and, with `auto_save`, schedule a
//! debounced write on a background writer thread. [`SessionStore::flush_session`]
//! and [`SessionStore::end_session`] cancel any pending write and persist
//! synchronously before returning. All writes happen under the store lock and
//! go through temp file + rename, so a reader never sees a torn file.
//!
//! Session ids are validated before they are turned into a path.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use chrono::DateTime;
use jsonschema::{Draft, Validator};
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::session_id::{generate_session_id, is_valid_session_id, validate_session_id};
use crate::error::KitError;
use crate::io::config::{KitConfig, KitPaths};
use crate::session::{AgentResult, SessionStatus, TeamSession, now_timestamp, summarize};

const SESSION_SCHEMA: &str = include_str!("../../schemas/team_session.schema.json");

/// Store settings.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub sessions_dir: PathBuf,
    pub auto_save: bool,
    pub debounce: Duration,
    /// Retry budget given to new sessions until a workflow sets its own.
    pub max_retries_default: u32,
}

impl StoreOptions {
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            auto_save: true,
            debounce: Duration::from_millis(500),
            max_retries_default: 3,
        }
    }

    pub fn from_config(paths: &KitPaths, config: &KitConfig) -> Self {
        Self {
            sessions_dir: paths.sessions_dir(config),
            auto_save: config.auto_save,
            debounce: config.save_debounce(),
            max_retries_default: config.max_retries_default,
        }
    }

    pub fn auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

struct State {
    current: Option<TeamSession>,
    /// Deadline of the scheduled debounced write, if any.
    pending: Option<Instant>,
    /// The current session has changes not yet on disk.
    dirty: bool,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wake: Condvar,
    sessions_dir: PathBuf,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Write the current session, if any, and mark it clean. Caller holds the lock.
    fn persist_current(&self, state: &mut State) -> Result<()> {
        if let Some(session) = &state.current {
            write_session(&self.sessions_dir, session)?;
        }
        state.dirty = false;
        Ok(())
    }
}

/// Owner of the current team session and of the session files on disk.
pub struct SessionStore {
    shared: Arc<Shared>,
    options: StoreOptions,
    validator: Validator,
    writer: Option<JoinHandle<()>>,
}

impl SessionStore {
    pub fn new(options: StoreOptions) -> Result<Self> {
        let schema: Value = serde_json::from_str(SESSION_SCHEMA).context("parse session schema")?;
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .context("compile session schema")?;

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                current: None,
                pending: None,
                dirty: false,
                shutdown: false,
            }),
            wake: Condvar::new(),
            sessions_dir: options.sessions_dir.clone(),
        });

        let writer = if options.auto_save {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name("session-writer".to_string())
                .spawn(move || writer_loop(&shared))
                .context("spawn session writer thread")?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            shared,
            options,
            validator,
            writer,
        })
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.options.sessions_dir
    }

    /// Start a new `active` session and make it current.
    ///
    /// A previous current session is not merged; if it has an unsaved change
    /// it is written first.
    #[instrument(skip_all)]
    pub fn start_session(&self, goal: &str, name: Option<&str>) -> Result<TeamSession> {
        let mut state = self.shared.lock();
        state.pending = None;
        if state.dirty {
            self.shared.persist_current(&mut state)?;
        }
        let session = TeamSession::new(
            generate_session_id(),
            goal,
            name,
            self.options.max_retries_default,
        );
        info!(session_id = %session.id, "session started");
        state.current = Some(session.clone());
        state.dirty = true;
        self.schedule_save(&mut state);
        Ok(session)
    }

    pub fn current_session(&self) -> Option<TeamSession> {
        self.shared.lock().current.clone()
    }

    /// Append a result to the current session's audit trail.
    pub fn add_agent_result(&self, result: AgentResult) -> Result<()> {
        self.mutate(|session| {
            debug!(agent = %result.agent, status = ?result.status, "recording agent result");
            session.agents.push(result);
        })
    }

    pub fn update_context(&self, key: &str, value: Value) -> Result<()> {
        self.mutate(|session| {
            session.context.insert(key.to_string(), value);
        })
    }

    pub fn get_context(&self, key: &str) -> Option<Value> {
        self.shared
            .lock()
            .current
            .as_ref()
            .and_then(|s| s.context.get(key).cloned())
    }

    /// Record the workflow driving the current session and adopt its retry budget.
    pub fn set_workflow(&self, workflow: &str, max_retries: u32) -> Result<()> {
        self.mutate(|session| {
            session.workflow_type = Some(workflow.to_string());
            session.max_retries = max_retries;
        })
    }

    /// Increment and return `retryCount`. The ceiling is not enforced here.
    pub fn increment_retry(&self) -> Result<u32> {
        let mut count = 0;
        self.mutate(|session| {
            session.retry_count += 1;
            count = session.retry_count;
        })?;
        Ok(count)
    }

    /// True iff there is a current session with `retryCount < maxRetries`.
    pub fn can_retry(&self) -> bool {
        self.shared
            .lock()
            .current
            .as_ref()
            .is_some_and(TeamSession::can_retry)
    }

    /// Finalize the current session with a terminal `status`, persist it, and clear it.
    ///
    /// Returns `None` when there is no current session. If the write fails the
    /// session stays current and `active`, so the caller can retry the end.
    #[instrument(skip_all, fields(status = status.as_str()))]
    pub fn end_session(&self, status: SessionStatus) -> Result<Option<TeamSession>> {
        if !status.is_terminal() {
            bail!("cannot end a session with status '{}'", status.as_str());
        }
        let mut state = self.shared.lock();
        let Some(current) = state.current.as_ref() else {
            return Ok(None);
        };
        if current.status.is_terminal() {
            bail!("session {} is already {}", current.id, current.status.as_str());
        }
        let mut ended = current.clone();
        ended.end_time = Some(now_timestamp());
        ended.status = status;
        write_session(&self.shared.sessions_dir, &ended)?;

        state.current = None;
        state.pending = None;
        state.dirty = false;
        info!(session_id = %ended.id, results = ended.agents.len(), "session ended");
        Ok(Some(ended))
    }

    /// Persist the current session now, cancelling any pending debounced write.
    pub fn flush_session(&self) -> Result<()> {
        let mut state = self.shared.lock();
        if state.current.is_none() {
            return Err(KitError::SessionNotFound.into());
        }
        state.pending = None;
        self.shared.persist_current(&mut state)
    }

    /// Read a persisted session by id.
    ///
    /// The id is validated before any path is built, so a malformed id never
    /// reaches the filesystem. Returns `None` if no such session file exists.
    pub fn load_session(&self, id: &str) -> Result<Option<TeamSession>> {
        validate_session_id(id)?;
        let path = session_path(&self.options.sessions_dir, id);
        if !path.exists() {
            debug!(session_id = id, "session file not found");
            return Ok(None);
        }
        let session = self.read_session_file(&path)?;
        if session.id != id {
            bail!(
                "session file {} holds id '{}', expected '{id}'",
                path.display(),
                session.id
            );
        }
        Ok(Some(session))
    }

    /// Persisted sessions, most recent first, at most `limit` of them.
    pub fn list_sessions(&self, limit: Option<usize>) -> Result<Vec<TeamSession>> {
        let dir = &self.options.sessions_dir;
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let entries =
            fs::read_dir(dir).with_context(|| format!("read sessions dir {}", dir.display()))?;

        let mut sessions = Vec::new();
        for entry in entries {
            let path = entry.context("read sessions dir entry")?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_valid_session_id(stem) {
                continue;
            }
            match self.read_session_file(&path) {
                Ok(session) => sessions.push(session),
                Err(err) => warn!(path = %path.display(), err = %format!("{err:#}"), "skipping unreadable session"),
            }
        }

        sessions.sort_by(|a, b| {
            let a_time = DateTime::parse_from_rfc3339(&a.start_time).ok();
            let b_time = DateTime::parse_from_rfc3339(&b.start_time).ok();
            b_time.cmp(&a_time).then_with(|| b.id.cmp(&a.id))
        });
        if let Some(limit) = limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    /// Remove a persisted session file. Returns false if it did not exist.
    pub fn delete_session(&self, id: &str) -> Result<bool> {
        validate_session_id(id)?;
        let path = session_path(&self.options.sessions_dir, id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove {}", path.display())),
        }
    }

    /// Digest of the current session (goal, agent outcomes, duration).
    pub fn session_summary(&self) -> Option<String> {
        self.shared.lock().current.as_ref().map(summarize)
    }

    fn mutate(&self, apply: impl FnOnce(&mut TeamSession)) -> Result<()> {
        let mut state = self.shared.lock();
        let session = state.current.as_mut().ok_or(KitError::SessionNotFound)?;
        if session.status.is_terminal() {
            bail!("session {} is already {}", session.id, session.status.as_str());
        }
        apply(session);
        state.dirty = true;
        self.schedule_save(&mut state);
        Ok(())
    }

    /// Push the debounce deadline out; the writer thread coalesces bursts.
    fn schedule_save(&self, state: &mut State) {
        if !self.options.auto_save {
            return;
        }
        state.pending = Some(Instant::now() + self.options.debounce);
        self.shared.wake.notify_all();
    }

    fn read_session_file(&self, path: &Path) -> Result<TeamSession> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read session {}", path.display()))?;
        let doc: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse session {}", path.display()))?;
        let messages: Vec<String> = self
            .validator
            .iter_errors(&doc)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(anyhow!(
                "session {} failed schema validation:\n- {}",
                path.display(),
                messages.join("\n- ")
            ));
        }
        serde_json::from_value(doc).with_context(|| format!("decode session {}", path.display()))
    }
}

impl Drop for SessionStore {
    fn drop(&mut self) {
        {
            let mut state = self.shared.lock();
            state.shutdown = true;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = self.writer.take()
            && handle.join().is_err()
        {
            warn!("session writer thread panicked");
        }
    }
}

/// Background writer: sleeps until the debounce deadline, then persists.
///
/// On shutdown any unsaved change is written before exiting.
fn writer_loop(shared: &Shared) {
    let mut state = shared.lock();
    loop {
        if state.shutdown {
            state.pending = None;
            if state.dirty {
                log_write_error(shared.persist_current(&mut state));
            }
            break;
        }
        match state.pending {
            None => {
                state = shared.wake.wait(state).unwrap_or_else(PoisonError::into_inner);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    state.pending = None;
                    log_write_error(shared.persist_current(&mut state));
                } else {
                    state = shared
                        .wake
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
    debug!("session writer stopped");
}

fn log_write_error(result: Result<()>) {
    if let Err(err) = result {
        warn!(err = %format!("{err:#}"), "debounced session write failed");
    }
}

fn session_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.json"))
}

/// Atomically write a session file (temp file + rename).
fn write_session(dir: &Path, session: &TeamSession) -> Result<()> {
    validate_session_id(&session.id)?;
    fs::create_dir_all(dir).with_context(|| format!("create sessions dir {}", dir.display()))?;
    let path = session_path(dir, &session.id);
    debug!(path = %path.display(), results = session.agents.len(), "writing session");
    let mut buf = serde_json::to_string_pretty(session).context("serialize session")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp session {}", tmp_path.display()))?;
    fs::rename(&tmp_path, &path).with_context(|| format!("replace session {}", path.display()))?;
    Ok(())
}
