//! Context-cache coordination.
//!
//! - [`CacheRegistry`]: durable `(content_id, model) → handle` map with a
//!   bounded JSON snapshot on disk.
//! - [`FailureTracker`]: permanently uncacheable keys plus the most recent
//!   transient failure per key, for diagnostics.
//! - [`CacheCoordinator`]: the entry point. Owns the registry, the tracker
//!   and the map of in-flight prewarm tasks, and talks to the
//!   [`RemoteCacheService`](crate::remote::RemoteCacheService).
//!
//! Nothing in this module returns an error to its caller. Every remote
//! failure resolves to "absent" (`None` / `false`) and leaves a trace in
//! the tracker, so the conversation layer always has an uncached path.

pub mod coordinator;
pub(crate) mod prewarm;
pub mod registry;
pub mod tracker;

use std::path::PathBuf;
use std::time::Duration;

pub use coordinator::{CacheCoordinator, CacheDiagnostics};
pub use prewarm::PrewarmTask;
pub use registry::{CacheRegistry, MAX_REGISTRY_ENTRIES, RegistryLoadError};
pub use tracker::{DEFAULT_MAX_FAILURES, FailureTracker};

/// Configuration for the cache coordinator.
///
/// ```rust
/// # use mimir::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .ttl(Duration::from_secs(1800))
///     .max_registry_entries(200);
/// assert_eq!(config.max_registry_entries, 200);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lease requested on create and on every refresh. Default: 1 hour.
    pub ttl: Duration,
    /// Cap on registry entries, in memory and on disk. Default: 500.
    pub max_registry_entries: usize,
    /// Cap on remembered transient failures. Default: 100.
    pub max_failures: u64,
    /// Where the registry snapshot lives. `None` keeps it in memory only.
    pub registry_path: Option<PathBuf>,
    /// How long a turn waits on an in-flight prewarm before going
    /// uncached. Default: 5 seconds.
    pub prewarm_wait: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_registry_entries: MAX_REGISTRY_ENTRIES,
            max_failures: DEFAULT_MAX_FAILURES,
            registry_path: None,
            prewarm_wait: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Create a config with in-memory defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the lease duration.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the registry entry cap.
    pub fn max_registry_entries(mut self, n: usize) -> Self {
        self.max_registry_entries = n;
        self
    }

    /// Set the failure log cap.
    pub fn max_failures(mut self, n: u64) -> Self {
        self.max_failures = n;
        self
    }

    /// Persist the registry at `path`.
    pub fn registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }

    /// Set how long turns wait on an in-flight prewarm.
    pub fn prewarm_wait(mut self, wait: Duration) -> Self {
        self.prewarm_wait = wait;
        self
    }
}

/// Default registry location: `~/.cache/mimir/context_caches.json`.
pub fn default_registry_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("mimir")
        .join("context_caches.json")
}
