//! Multi-turn session state.
//!
//! [`SessionStore`] keeps live sessions in memory and, when configured,
//! mirrors every mutation to SQLite so sessions survive restarts. A session
//! lives until it sits idle past the configured timeout or is pushed out by
//! capacity (oldest `last_active` first). There are no other states.
//!
//! Persistence is best-effort: database errors are logged and the in-memory
//! state stays authoritative. The one error callers see is
//! [`MimirError::SessionNotFound`].

pub mod continuation;
pub mod db;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::types::{Session, Turn};
use crate::{MimirError, Result};

pub use continuation::{Conversation, TurnRequest};
pub use db::SessionDb;

/// Configuration for the session store.
///
/// ```rust
/// # use mimir::SessionConfig;
/// # use std::time::Duration;
/// let config = SessionConfig::new()
///     .timeout(Duration::from_secs(600))
///     .max_turns(5);
/// assert_eq!(config.max_turns, 5);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Idle time after which a session expires. Default: 1 hour.
    pub timeout: Duration,
    /// Maximum live sessions in memory. Default: 50.
    pub max_sessions: usize,
    /// Turns (user + model pairs) kept in history. Default: 10.
    pub max_turns: usize,
    /// SQLite database path. `None` disables persistence.
    pub db_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3600),
            max_sessions: 50,
            max_turns: 10,
            db_path: None,
        }
    }
}

impl SessionConfig {
    /// Create a config with in-memory defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the idle timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the maximum number of live sessions.
    pub fn max_sessions(mut self, n: usize) -> Self {
        self.max_sessions = n;
        self
    }

    /// Set the number of turns kept in history.
    pub fn max_turns(mut self, n: usize) -> Self {
        self.max_turns = n;
        self
    }

    /// Persist sessions in the SQLite database at `path`.
    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }
}

/// Default database location: `~/.cache/mimir/sessions.db`.
pub fn default_db_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("mimir")
        .join("sessions.db")
}

/// Parameters for [`SessionStore::create`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub content_ref: String,
    pub mime_type: String,
    pub content_id: String,
    pub mode: String,
    pub title: String,
    pub cache_handle: Option<String>,
    pub model: Option<String>,
}

impl NewSession {
    /// Session about `content_ref` in the given analysis mode.
    pub fn new(content_ref: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            content_ref: content_ref.into(),
            mode: mode.into(),
            ..Default::default()
        }
    }

    /// Set the content fingerprint used for cache keys.
    pub fn content_id(mut self, id: impl Into<String>) -> Self {
        self.content_id = id.into();
        self
    }

    /// Set the MIME type of the content reference.
    pub fn mime_type(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = mime.into();
        self
    }

    /// Set a display title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Carry an already resolved cache handle for `model`.
    pub fn cache(mut self, handle: impl Into<String>, model: impl Into<String>) -> Self {
        self.cache_handle = Some(handle.into());
        self.model = Some(model.into());
        self
    }

    /// Set the model without a cache handle.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// In-memory session map with optional SQLite mirror.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    db: Option<Arc<Mutex<SessionDb>>>,
    /// Serialises mutate-then-persist so rows are written in call order.
    write_order: tokio::sync::Mutex<()>,
    config: SessionConfig,
}

impl SessionStore {
    /// Create a store, opening the database at `config.db_path` if set.
    ///
    /// A database that cannot be opened is logged and the store runs
    /// memory-only.
    pub fn new(config: SessionConfig) -> Self {
        let db = config
            .db_path
            .as_ref()
            .and_then(|path| match SessionDb::open(path) {
                Ok(db) => Some(db),
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "session database unavailable, running in memory"
                    );
                    None
                }
            });
        Self::build(config, db)
    }

    /// Create a store backed by an already opened database.
    pub fn with_database(config: SessionConfig, db: SessionDb) -> Self {
        Self::build(config, Some(db))
    }

    fn build(config: SessionConfig, db: Option<SessionDb>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            db: db.map(|db| Arc::new(Mutex::new(db))),
            write_order: tokio::sync::Mutex::new(()),
            config,
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a database mirror is attached.
    pub fn is_persistent(&self) -> bool {
        self.db.is_some()
    }

    /// Start a new session.
    ///
    /// Expired sessions are evicted first; at capacity, the least recently
    /// active session is evicted to make room.
    pub async fn create(&self, params: NewSession) -> Session {
        self.evict_expired().await;

        let mut session = Session::new(params.content_ref, params.mode);
        session.mime_type = params.mime_type;
        session.content_id = params.content_id;
        session.title = params.title;
        session.cache_handle = params.cache_handle.filter(|h| !h.is_empty());
        session.model = params.model;

        let _order = self.write_order.lock().await;
        {
            let mut sessions = self.lock();
            self.make_room(&mut sessions);
            sessions.insert(session.session_id.clone(), session.clone());
        }
        info!(
            session_id = %session.session_id,
            cached = session.is_cached(),
            "created session"
        );
        self.persist(&session).await;
        session
    }

    /// Look up a session, reloading it from the database on a memory miss.
    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.evict_expired().await;

        if let Some(session) = self.lock().get(session_id) {
            return Some(session.clone());
        }

        let id = session_id.to_string();
        let loaded = self.with_db("load", move |db| db.load(&id)).await.flatten()?;
        if self.is_expired(&loaded) {
            debug!(session_id, "persisted session expired");
            let id = session_id.to_string();
            self.with_db("delete", move |db| db.delete(&id)).await;
            return None;
        }

        debug!(session_id, "resumed session from database");
        let mut sessions = self.lock();
        let session = sessions
            .entry(session_id.to_string())
            .or_insert(loaded)
            .clone();
        if sessions.len() > self.config.max_sessions.max(1) {
            self.evict_oldest_except(&mut sessions, session_id);
        }
        Some(session)
    }

    /// Append a user/model exchange. Returns the new turn count.
    ///
    /// History keeps the most recent `max_turns` exchanges; the oldest are
    /// dropped first.
    pub async fn add_turn(&self, session_id: &str, user: Turn, model: Turn) -> Result<u32> {
        // Pull a persisted session back into memory if needed.
        self.get(session_id)
            .await
            .ok_or_else(|| MimirError::SessionNotFound(session_id.to_string()))?;

        let max_len = self.config.max_turns.max(1) * 2;
        let _order = self.write_order.lock().await;
        let snapshot = {
            let mut sessions = self.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| MimirError::SessionNotFound(session_id.to_string()))?;
            session.history.push(user);
            session.history.push(model);
            if session.history.len() > max_len {
                let excess = session.history.len() - max_len;
                session.history.drain(..excess);
            }
            session.turn_count += 1;
            session.touch();
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(snapshot.turn_count)
    }

    /// Point a session at a cache handle for `model`.
    pub async fn attach_cache(
        &self,
        session_id: &str,
        handle: String,
        model: String,
    ) -> Result<()> {
        self.update(session_id, move |s| {
            s.cache_handle = Some(handle);
            s.model = Some(model);
        })
        .await
    }

    /// Drop a session's cache handle, keeping its model.
    pub async fn detach_cache(&self, session_id: &str) -> Result<()> {
        self.update(session_id, |s| s.cache_handle = None).await
    }

    /// Delete a session from memory and the database.
    pub async fn remove(&self, session_id: &str) -> bool {
        let in_memory = self.lock().remove(session_id).is_some();
        let id = session_id.to_string();
        let in_db = self
            .with_db("delete", move |db| db.delete(&id))
            .await
            .unwrap_or(false);
        in_memory || in_db
    }

    /// Number of live sessions in memory.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no sessions are live in memory.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn update<F>(&self, session_id: &str, f: F) -> Result<()>
    where
        F: FnOnce(&mut Session),
    {
        self.get(session_id)
            .await
            .ok_or_else(|| MimirError::SessionNotFound(session_id.to_string()))?;

        let _order = self.write_order.lock().await;
        let snapshot = {
            let mut sessions = self.lock();
            let session = sessions
                .get_mut(session_id)
                .ok_or_else(|| MimirError::SessionNotFound(session_id.to_string()))?;
            f(session);
            session.clone()
        };
        self.persist(&snapshot).await;
        Ok(())
    }

    /// Drop idle sessions from memory and the database.
    ///
    /// The database pass also catches rows whose in-memory copy was already
    /// pushed out by capacity.
    async fn evict_expired(&self) {
        let evicted = {
            let mut sessions = self.lock();
            let before = sessions.len();
            sessions.retain(|_, s| !self.is_expired(s));
            before - sessions.len()
        };
        if evicted > 0 {
            info!(count = evicted, "evicted expired sessions");
        }

        let Ok(timeout) = TimeDelta::from_std(self.config.timeout) else {
            return;
        };
        let cutoff = Utc::now() - timeout;
        if let Some(purged) = self
            .with_db("purge", move |db| db.delete_idle_before(cutoff))
            .await
            .filter(|n| *n > 0)
        {
            debug!(count = purged, "purged expired session rows");
        }
    }

    /// Evict the least recently active session while at capacity.
    fn make_room(&self, sessions: &mut HashMap<String, Session>) {
        while sessions.len() >= self.config.max_sessions.max(1) {
            if !self.evict_oldest_except(sessions, "") {
                break;
            }
        }
    }

    fn evict_oldest_except(&self, sessions: &mut HashMap<String, Session>, keep: &str) -> bool {
        let oldest = sessions
            .values()
            .filter(|s| s.session_id != keep)
            .min_by_key(|s| s.last_active)
            .map(|s| s.session_id.clone());
        match oldest {
            Some(id) => {
                debug!(session_id = %id, "evicting least recently active session");
                sessions.remove(&id);
                true
            }
            None => false,
        }
    }

    fn is_expired(&self, session: &Session) -> bool {
        (Utc::now() - session.last_active)
            .to_std()
            .is_ok_and(|idle| idle > self.config.timeout)
    }

    async fn persist(&self, session: &Session) {
        let session = session.clone();
        self.with_db("save", move |db| db.save(&session)).await;
    }

    /// Run `f` against the database off the async runtime.
    ///
    /// Returns `None` when persistence is disabled or the call failed.
    async fn with_db<T, F>(&self, operation: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&SessionDb) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(self.db.as_ref()?);
        let joined = tokio::task::spawn_blocking(move || {
            let db = db.lock().unwrap_or_else(PoisonError::into_inner);
            f(&db)
        })
        .await;
        match joined {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(operation, error = %e, "session persistence failed");
                None
            }
            Err(e) => {
                warn!(operation, error = %e, "session persistence task failed");
                None
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
