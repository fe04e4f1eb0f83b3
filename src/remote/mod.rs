//! Remote cache service seam.
//!
//! The cache layer talks to the backend that stores cached content only
//! through [`RemoteCacheService`]. Implementations translate whatever their
//! SDK or wire protocol reports into the closed [`RemoteCacheError`] set,
//! so classification upstream is a `match`, not message sniffing.
//!
//! # Example
//!
//! ```ignore
//! #[async_trait]
//! impl RemoteCacheService for MyBackend {
//!     async fn create(&self, model: &str, parts: &[ContentPart], ttl: Duration)
//!         -> Result<CacheDescriptor, RemoteCacheError> {
//!         // ...
//!     }
//!     // get / update / delete
//! }
//! ```

pub mod gemini;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::ContentPart;

pub use gemini::GeminiCacheClient;

/// Failure reported by a remote cache backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteCacheError {
    /// The content is too small to be cached. Permanent for that content
    /// and model.
    #[error("content below minimum cacheable size: {0}")]
    BelowMinimumSize(String),

    /// The handle does not exist (expired or deleted server-side).
    #[error("cache handle not found: {0}")]
    NotFound(String),

    /// Network, quota, or anything else worth trying again later.
    #[error("transient remote failure: {0}")]
    Transient(String),
}

/// What the backend reports about a cached representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDescriptor {
    /// Opaque handle, e.g. `cachedContents/abc123`.
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub expire_time: Option<String>,
}

impl CacheDescriptor {
    /// Descriptor carrying only a handle.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: None,
            expire_time: None,
        }
    }
}

/// Backend capable of storing content server-side behind an opaque handle.
#[async_trait]
pub trait RemoteCacheService: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// Create a cached representation of `parts` for `model`.
    async fn create(
        &self,
        model: &str,
        parts: &[ContentPart],
        ttl: Duration,
    ) -> Result<CacheDescriptor, RemoteCacheError>;

    /// Look up an existing handle.
    async fn get(&self, handle: &str) -> Result<CacheDescriptor, RemoteCacheError>;

    /// Extend the lease on a handle.
    async fn update(&self, handle: &str, ttl: Duration) -> Result<(), RemoteCacheError>;

    /// Delete a handle.
    async fn delete(&self, handle: &str) -> Result<(), RemoteCacheError>;
}
