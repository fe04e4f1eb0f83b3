//! SQLite persistence for sessions.
//!
//! One row per session. History is a JSON array. Columns added after the
//! first release are migrated in with `ALTER TABLE ... DEFAULT ''`, so rows
//! written by older builds keep loading.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{debug, info};

use crate::Result;
use crate::types::{Session, Turn};

/// Columns that may be missing from databases created by older builds.
const ADDITIVE_COLUMNS: &[&str] = &["mime_type", "content_id", "title", "cache_handle", "model"];

/// SQLite-backed session table.
pub struct SessionDb {
    conn: Connection,
}

impl SessionDb {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database for testing.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                content_ref TEXT NOT NULL,
                mode TEXT NOT NULL,
                history TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                last_active TEXT NOT NULL,
                turn_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            [],
        )?;
        self.migrate()
    }

    /// Add any column from [`ADDITIVE_COLUMNS`] the table lacks.
    fn migrate(&self) -> Result<()> {
        let mut stmt = self.conn.prepare("PRAGMA table_info(sessions)")?;
        let existing = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        for column in ADDITIVE_COLUMNS {
            if !existing.iter().any(|c| c == column) {
                info!(column, "migrating sessions table");
                self.conn.execute(
                    &format!("ALTER TABLE sessions ADD COLUMN {column} TEXT NOT NULL DEFAULT ''"),
                    [],
                )?;
            }
        }
        Ok(())
    }

    /// Insert or replace a session row.
    pub fn save(&self, session: &Session) -> Result<()> {
        let history = serde_json::to_string(&session.history)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO sessions (
                session_id, content_ref, mime_type, content_id, mode, title,
                cache_handle, model, history, created_at, last_active, turn_count
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                session.session_id,
                session.content_ref,
                session.mime_type,
                session.content_id,
                session.mode,
                session.title,
                session.cache_handle.clone().unwrap_or_default(),
                session.model.clone().unwrap_or_default(),
                history,
                session.created_at.to_rfc3339(),
                session.last_active.to_rfc3339(),
                session.turn_count,
            ],
        )?;
        debug!(session_id = %session.session_id, "persisted session");
        Ok(())
    }

    /// Load a session by id.
    pub fn load(&self, session_id: &str) -> Result<Option<Session>> {
        let row = self
            .conn
            .query_row(
                r#"
                SELECT session_id, content_ref, mime_type, content_id, mode, title,
                       cache_handle, model, history, created_at, last_active, turn_count
                FROM sessions WHERE session_id = ?1
                "#,
                params![session_id],
                RawSession::from_row,
            )
            .optional()?;
        row.map(RawSession::into_session).transpose()
    }

    /// Delete a session. Returns whether a row was removed.
    pub fn delete(&self, session_id: &str) -> Result<bool> {
        let n = self
            .conn
            .execute("DELETE FROM sessions WHERE session_id = ?1", params![session_id])?;
        Ok(n > 0)
    }

    /// Delete every session last active before `cutoff`. Returns the number
    /// of rows removed.
    pub fn delete_idle_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT session_id, last_active FROM sessions")?;
        let idle = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .filter(|(_, last_active)| parse_timestamp(last_active) < cutoff)
            .map(|(id, _)| id)
            .collect::<Vec<_>>();
        drop(stmt);

        let mut removed = 0;
        for id in &idle {
            removed += self
                .conn
                .execute("DELETE FROM sessions WHERE session_id = ?1", params![id])?;
        }
        Ok(removed)
    }

    /// All sessions, most recently active first.
    pub fn list(&self) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT session_id, content_ref, mime_type, content_id, mode, title,
                   cache_handle, model, history, created_at, last_active, turn_count
            FROM sessions ORDER BY last_active DESC
            "#,
        )?;
        let rows = stmt.query_map([], RawSession::from_row)?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }
}

/// Column values before JSON/timestamp decoding.
struct RawSession {
    session_id: String,
    content_ref: String,
    mime_type: String,
    content_id: String,
    mode: String,
    title: String,
    cache_handle: String,
    model: String,
    history: String,
    created_at: String,
    last_active: String,
    turn_count: u32,
}

impl RawSession {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            content_ref: row.get(1)?,
            mime_type: row.get(2)?,
            content_id: row.get(3)?,
            mode: row.get(4)?,
            title: row.get(5)?,
            cache_handle: row.get(6)?,
            model: row.get(7)?,
            history: row.get(8)?,
            created_at: row.get(9)?,
            last_active: row.get(10)?,
            turn_count: row.get(11)?,
        })
    }

    fn into_session(self) -> Result<Session> {
        let history: Vec<Turn> = serde_json::from_str(&self.history)?;
        Ok(Session {
            session_id: self.session_id,
            content_ref: self.content_ref,
            mime_type: self.mime_type,
            content_id: self.content_id,
            mode: self.mode,
            title: self.title,
            cache_handle: non_empty(self.cache_handle),
            model: non_empty(self.model),
            history,
            created_at: parse_timestamp(&self.created_at),
            last_active: parse_timestamp(&self.last_active),
            turn_count: self.turn_count,
        })
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() { None } else { Some(s) }
}

/// Unparseable timestamps read as the Unix epoch, which makes the session
/// look long idle and lets expiry clean it up.
fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
