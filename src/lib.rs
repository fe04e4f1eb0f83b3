//! Mimir - context caching and multi-turn sessions for multimodal model APIs
//!
//! Large content (a video, a long document) is expensive to resend on every
//! turn. Mimir keeps one server-side cached representation per
//! `(content, model)` pair, dedupes concurrent creations, remembers content
//! that is too small to ever cache, and carries conversations across turns
//! and restarts. Every cache failure degrades to an uncached request; the
//! conversation never sees it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use mimir::{
//!     CacheConfig, CacheCoordinator, Conversation, GeminiCacheClient, NewSession,
//!     SessionConfig, SessionStore,
//! };
//!
//! #[tokio::main]
//! async fn main() -> mimir::Result<()> {
//!     let remote = Arc::new(GeminiCacheClient::new("AIza-your-key")?);
//!     let cache = CacheCoordinator::new(remote, CacheConfig::default());
//!     let sessions = Arc::new(SessionStore::new(SessionConfig::default()));
//!     let conversation = Conversation::new(sessions, cache, "gemini-2.0-flash");
//!
//!     let session = conversation
//!         .open_session(NewSession::new("https://youtu.be/abc", "general").content_id("abc"))
//!         .await;
//!
//!     let request = conversation
//!         .prepare_turn(&session.session_id, "What happens at the end?")
//!         .await?;
//!     println!("cached: {}", request.is_cached());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod remote;
pub mod session;
pub mod telemetry;
pub mod types;
mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheCoordinator, CacheDiagnostics};
pub use config::{Config, Secrets};
pub use error::{MimirError, Result};
pub use remote::{CacheDescriptor, GeminiCacheClient, RemoteCacheError, RemoteCacheService};
pub use session::{Conversation, NewSession, SessionConfig, SessionDb, SessionStore, TurnRequest};
pub use types::{CacheKey, ContentPart, Role, Session, Turn};
pub use version::{GIT_BRANCH, GIT_SHA, PKG_VERSION, git_dirty, version_string};
