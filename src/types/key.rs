//! Cache keys.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a cached representation: one piece of content as seen by one
/// model.
///
/// `content_id` is a stable fingerprint chosen by the caller (a file hash or
/// an external video id). It never contains `/`; `model` may (e.g.
/// `models/gemini-2.0-flash`), so the serialized form splits on the first
/// slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub content_id: String,
    pub model: String,
}

impl CacheKey {
    /// Create a key from a content fingerprint and a model name.
    pub fn new(content_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            model: model.into(),
        }
    }

    /// Parse the `content_id/model` form used by the registry file.
    ///
    /// Returns `None` when either half is empty or the separator is missing.
    pub fn parse(s: &str) -> Option<Self> {
        let (content_id, model) = s.split_once('/')?;
        if content_id.is_empty() || model.is_empty() {
            return None;
        }
        Some(Self::new(content_id, model))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.content_id, self.model)
    }
}
