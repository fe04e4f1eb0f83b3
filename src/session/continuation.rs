//! Turn continuation: the only path from conversation code into the cache
//! and session layers.
//!
//! For each turn [`Conversation::prepare_turn`] decides how the next request
//! is built:
//!
//! 1. The session holds a cache handle and its lease refreshes: send only
//!    history plus the new question; the content lives server-side.
//! 2. The refresh fails: detach the handle and resend the content
//!    reference inline, as if the session had never been cached.
//! 3. The session has no handle but its content has a fingerprint: adopt a
//!    registry hit or an in-flight prewarm (bounded wait), else go inline.
//!
//! Degrading is silent. The reason lands in the coordinator's diagnostics.

use std::sync::Arc;

use tracing::{debug, info};

use super::{NewSession, SessionStore};
use crate::cache::CacheCoordinator;
use crate::telemetry;
use crate::types::{CacheKey, ContentPart, Role, Session, Turn};
use crate::{MimirError, Result};

/// MIME type assumed for content references that did not declare one.
const DEFAULT_CONTENT_MIME: &str = "video/*";

/// Everything needed to issue the next model call for a session.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnRequest {
    pub session_id: String,
    pub model: String,
    /// Server-side cache to reference instead of sending the content.
    pub cached_content: Option<String>,
    /// Conversation so far, ending with the new user turn.
    pub contents: Vec<Turn>,
}

impl TurnRequest {
    /// Whether the request relies on a server-side cache.
    pub fn is_cached(&self) -> bool {
        self.cached_content.is_some()
    }

    /// Whether any turn carries `part`.
    pub fn contains_part(&self, part: &ContentPart) -> bool {
        self.contents
            .iter()
            .any(|turn| turn.parts.iter().any(|p| p == part))
    }
}

/// Session-aware turn builder on top of the store and the coordinator.
#[derive(Clone)]
pub struct Conversation {
    sessions: Arc<SessionStore>,
    cache: CacheCoordinator,
    default_model: String,
}

impl Conversation {
    /// Create a conversation layer. `default_model` is used for sessions
    /// that never recorded one.
    pub fn new(
        sessions: Arc<SessionStore>,
        cache: CacheCoordinator,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            sessions,
            cache,
            default_model: default_model.into(),
        }
    }

    /// The session store.
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// The cache coordinator.
    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    /// Create a session, attaching a cache handle if one is ready or
    /// becomes ready within the configured prewarm wait.
    pub async fn open_session(&self, mut params: NewSession) -> Session {
        let model = params
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        if params.cache_handle.is_none() && !params.content_id.is_empty() {
            let key = CacheKey::new(&params.content_id, &model);
            let wait = self.cache.config().prewarm_wait;
            if let Some(handle) = self.cache.lookup_or_await(&key, wait).await {
                params.cache_handle = Some(handle);
            }
        }
        params.model = Some(model);
        self.sessions.create(params).await
    }

    /// Build the request for the next turn of `session_id`.
    ///
    /// Fails only with [`MimirError::SessionNotFound`]; every cache problem
    /// degrades to an inline request.
    pub async fn prepare_turn(&self, session_id: &str, text: &str) -> Result<TurnRequest> {
        let session = self
            .sessions
            .get(session_id)
            .await
            .ok_or_else(|| MimirError::SessionNotFound(session_id.to_string()))?;
        let model = session
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        if let Some(handle) = session.cache_handle.clone().filter(|h| !h.is_empty()) {
            let key = session.cache_key(&model);
            let refreshed = match &key {
                Some(key) => self.cache.refresh_ttl_for(key, &handle).await,
                None => self.cache.refresh_ttl(&handle).await,
            };
            if refreshed {
                debug!(session_id, handle = %handle, "continuing on cached content");
                return Ok(cached_request(&session, model, handle, text));
            }

            let reason = key
                .map(|key| self.cache.failure_reason(&key))
                .unwrap_or_default();
            info!(
                session_id,
                handle = %handle,
                reason = %reason,
                "cache unavailable, resending content inline"
            );
            metrics::counter!(telemetry::SESSION_FALLBACKS_TOTAL).increment(1);
            self.sessions.detach_cache(session_id).await?;
            return Ok(inline_request(&session, model, text));
        }

        if let Some(key) = session.cache_key(&model) {
            let wait = self.cache.config().prewarm_wait;
            if let Some(handle) = self.cache.lookup_or_await(&key, wait).await {
                debug!(session_id, handle = %handle, "adopting cache for session");
                self.sessions
                    .attach_cache(session_id, handle.clone(), model.clone())
                    .await?;
                return Ok(cached_request(&session, model, handle, text));
            }
        }

        Ok(inline_request(&session, model, text))
    }

    /// Record a completed exchange. Returns the session's turn count.
    pub async fn record_turn(
        &self,
        session_id: &str,
        user_text: &str,
        model_text: &str,
    ) -> Result<u32> {
        self.sessions
            .add_turn(session_id, Turn::user(user_text), Turn::model(model_text))
            .await
    }
}

fn cached_request(session: &Session, model: String, handle: String, text: &str) -> TurnRequest {
    let mut contents = session.history.clone();
    contents.push(Turn::user(text));
    TurnRequest {
        session_id: session.session_id.clone(),
        model,
        cached_content: Some(handle),
        contents,
    }
}

/// History plus the new question, with the content reference placed at
/// the front of the first user turn.
fn inline_request(session: &Session, model: String, text: &str) -> TurnRequest {
    let mime_type = if session.mime_type.is_empty() {
        DEFAULT_CONTENT_MIME
    } else {
        &session.mime_type
    };
    let content = ContentPart::file(&session.content_ref, mime_type);

    let mut contents = session.history.clone();
    contents.push(Turn::user(text));
    if let Some(first_user) = contents.iter_mut().find(|t| t.role == Role::User) {
        if !first_user.parts.contains(&content) {
            first_user.parts.insert(0, content);
        }
    }

    TurnRequest {
        session_id: session.session_id.clone(),
        model,
        cached_content: None,
        contents,
    }
}
