//! Session record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{CacheKey, Turn};

/// Multi-turn conversation state anchored to one piece of content.
///
/// `cache_handle` and `model` travel together: a session either references
/// a server-side cache for `(content_id, model)` or it resends the content
/// inline on every turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// URL or file URI of the content, re-attached inline when uncached.
    pub content_ref: String,
    /// MIME type of `content_ref`.
    #[serde(default)]
    pub mime_type: String,
    /// Fingerprint used as the cache key half. Empty when the content has
    /// no stable identity.
    #[serde(default)]
    pub content_id: String,
    /// Analysis mode chosen by the caller (e.g. "general", "tutorial").
    pub mode: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub cache_handle: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub history: Vec<Turn>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub turn_count: u32,
}

impl Session {
    /// Create a fresh session with a generated 12-character id.
    pub fn new(content_ref: impl Into<String>, mode: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(12);
        Self {
            session_id: id,
            content_ref: content_ref.into(),
            mime_type: String::new(),
            content_id: String::new(),
            mode: mode.into(),
            title: String::new(),
            cache_handle: None,
            model: None,
            history: Vec::new(),
            created_at: now,
            last_active: now,
            turn_count: 0,
        }
    }

    /// Cache key for this session's content, if it has one.
    pub fn cache_key(&self, model: &str) -> Option<CacheKey> {
        if self.content_id.is_empty() || model.is_empty() {
            None
        } else {
            Some(CacheKey::new(&self.content_id, model))
        }
    }

    /// Whether the session currently references a server-side cache.
    pub fn is_cached(&self) -> bool {
        self.cache_handle.as_deref().is_some_and(|h| !h.is_empty())
    }

    /// Update `last_active` to now.
    pub fn touch(&mut self) {
        self.last_active = Utc::now();
    }
}
