//! The cache coordinator: registry, tracker and prewarm dedup behind one
//! handle.
//!
//! Construct one per process and pass clones to whoever needs it; clones
//! share state. Tests build a fresh instance each, so no global reset is
//! ever needed.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::CacheConfig;
use super::prewarm::{PendingPrewarms, PrewarmTask};
use super::registry::CacheRegistry;
use super::tracker::FailureTracker;
use crate::remote::{RemoteCacheError, RemoteCacheService};
use crate::telemetry;
use crate::types::{CacheKey, ContentPart};

/// Read-only view of everything the coordinator tracks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheDiagnostics {
    /// `content_id/model` → handle.
    pub registry: BTreeMap<String, String>,
    /// Keys that will not be cached again until a reset.
    pub suppressed: Vec<String>,
    /// Keys with a creation task in flight.
    pub pending: Vec<String>,
    /// `content_id/model` → last transient failure.
    pub recent_failures: BTreeMap<String, String>,
}

struct Inner {
    remote: Arc<dyn RemoteCacheService>,
    registry: CacheRegistry,
    tracker: FailureTracker,
    pending: PendingPrewarms,
    config: CacheConfig,
}

/// Shared handle to the cache layer.
#[derive(Clone)]
pub struct CacheCoordinator {
    inner: Arc<Inner>,
}

impl CacheCoordinator {
    /// Create a coordinator, loading the registry from
    /// `config.registry_path` when set.
    pub fn new(remote: Arc<dyn RemoteCacheService>, config: CacheConfig) -> Self {
        let registry = match &config.registry_path {
            Some(path) => CacheRegistry::open(path, config.max_registry_entries),
            None => CacheRegistry::in_memory(config.max_registry_entries),
        };
        Self {
            inner: Arc::new(Inner {
                remote,
                registry,
                tracker: FailureTracker::new(config.max_failures),
                pending: PendingPrewarms::default(),
                config,
            }),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// The underlying registry.
    pub fn registry(&self) -> &CacheRegistry {
        &self.inner.registry
    }

    /// Handle currently recorded for `key`. No remote call.
    pub fn lookup(&self, key: &CacheKey) -> Option<String> {
        self.inner.registry.lookup(key)
    }

    /// Recorded handle for `key`, confirmed to still exist remotely.
    ///
    /// A handle the backend no longer knows (or cannot confirm) is evicted
    /// before this returns.
    pub async fn validate_and_get(&self, key: &CacheKey) -> Option<String> {
        let Some(handle) = self.inner.registry.lookup(key) else {
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
            return None;
        };

        match self.inner.remote.get(&handle).await {
            Ok(_) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(handle)
            }
            Err(e) => {
                debug!(key = %key, handle = %handle, error = %e, "evicting stale cache handle");
                self.inner.registry.remove_if(key, &handle);
                self.inner
                    .tracker
                    .record_failure(key, format!("stale handle {handle}: {e}"));
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    /// Usable handle for `key`, creating one from `parts` if needed.
    ///
    /// Suppressed keys short-circuit without any remote call. Undersized
    /// content suppresses the key; any other failure is recorded and
    /// resolves to `None`.
    pub async fn get_or_create(&self, key: &CacheKey, parts: &[ContentPart]) -> Option<String> {
        if self.inner.tracker.is_suppressed(key) {
            debug!(key = %key, "cache creation suppressed");
            return None;
        }

        if let Some(handle) = self.validate_and_get(key).await {
            return Some(handle);
        }

        let result = self
            .inner
            .remote
            .create(&key.model, parts, self.inner.config.ttl)
            .await;

        match result {
            Ok(descriptor) => {
                info!(
                    key = %key,
                    handle = %descriptor.name,
                    backend = self.inner.remote.name(),
                    "created context cache"
                );
                self.inner
                    .registry
                    .insert(key.clone(), descriptor.name.clone());
                self.inner.tracker.clear_failure(key);
                metrics::counter!(telemetry::CACHE_CREATIONS_TOTAL, "status" => "ok").increment(1);
                Some(descriptor.name)
            }
            Err(RemoteCacheError::BelowMinimumSize(reason)) => {
                info!(key = %key, reason = %reason, "content too small to cache, suppressing key");
                if self.inner.tracker.suppress(key, reason) {
                    metrics::counter!(telemetry::CACHE_SUPPRESSIONS_TOTAL).increment(1);
                }
                metrics::counter!(telemetry::CACHE_CREATIONS_TOTAL, "status" => "suppressed")
                    .increment(1);
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "context cache creation failed");
                self.inner.tracker.record_failure(key, e.to_string());
                metrics::counter!(telemetry::CACHE_CREATIONS_TOTAL, "status" => "error")
                    .increment(1);
                None
            }
        }
    }

    /// Extend the lease on `handle`. Returns `false` on any failure.
    ///
    /// A handle the backend reports as gone is evicted from the registry.
    /// Failures are recorded against the handle's registry key, if any.
    pub async fn refresh_ttl(&self, handle: &str) -> bool {
        self.refresh(handle, None).await
    }

    /// Like [`refresh_ttl`](Self::refresh_ttl), but a failure is recorded
    /// against `key` when the registry does not know `handle`.
    pub async fn refresh_ttl_for(&self, key: &CacheKey, handle: &str) -> bool {
        self.refresh(handle, Some(key)).await
    }

    async fn refresh(&self, handle: &str, owner: Option<&CacheKey>) -> bool {
        match self
            .inner
            .remote
            .update(handle, self.inner.config.ttl)
            .await
        {
            Ok(()) => {
                metrics::counter!(telemetry::TTL_REFRESHES_TOTAL, "status" => "ok").increment(1);
                true
            }
            Err(e) => {
                warn!(handle, error = %e, "cache TTL refresh failed");
                metrics::counter!(telemetry::TTL_REFRESHES_TOTAL, "status" => "error")
                    .increment(1);
                let reason = format!("TTL refresh failed: {e}");
                match self.inner.registry.key_for_handle(handle) {
                    Some(key) => {
                        self.inner.tracker.record_failure(&key, reason);
                        if matches!(e, RemoteCacheError::NotFound(_)) {
                            self.inner.registry.remove_if(&key, handle);
                        }
                    }
                    None => {
                        if let Some(key) = owner {
                            self.inner.tracker.record_failure(key, reason);
                        }
                    }
                }
                false
            }
        }
    }

    /// Delete every tracked remote handle and reset all bookkeeping.
    ///
    /// Delete failures are logged and skipped. Returns the number of
    /// registry entries removed.
    pub async fn clear(&self) -> usize {
        let entries = self.inner.registry.drain();
        for (key, handle) in &entries {
            if let Err(e) = self.inner.remote.delete(handle).await {
                warn!(key = %key, handle = %handle, error = %e, "failed to delete remote cache");
            }
        }
        self.inner.tracker.reset();
        info!(count = entries.len(), "cleared context caches");
        entries.len()
    }

    /// Start creating a cache for `key` in the background, or join the
    /// creation already running for it.
    ///
    /// At most one creation runs per key. The returned task can be awaited
    /// or dropped; either way the work runs to completion.
    ///
    /// # Panics
    ///
    /// Requires a tokio runtime context.
    pub fn start_prewarm(&self, key: &CacheKey, parts: &[ContentPart]) -> PrewarmTask {
        let (task, joined) = self.inner.pending.join_or_start(key, |id| {
            let this = self.clone();
            let key = key.clone();
            let parts = parts.to_vec();
            let join = tokio::spawn(async move {
                let handle = this.get_or_create(&key, &parts).await;
                this.inner.pending.complete(&key, id);
                handle
            });
            let abort = join.abort_handle();
            let task = async move { join.await.ok().flatten() }.boxed().shared();
            (task, abort)
        });

        if joined {
            debug!(key = %key, "joined in-flight prewarm");
            metrics::counter!(telemetry::PREWARM_JOINS_TOTAL).increment(1);
        } else {
            debug!(key = %key, "started prewarm");
        }
        task
    }

    /// Valid handle for `key`, waiting up to `timeout` on an in-flight
    /// prewarm if there is one.
    ///
    /// Never starts a creation itself. Timing out leaves the prewarm
    /// running for later callers.
    pub async fn lookup_or_await(&self, key: &CacheKey, timeout: Duration) -> Option<String> {
        if let Some(handle) = self.validate_and_get(key).await {
            return Some(handle);
        }
        let task = self.inner.pending.running(key)?;
        match tokio::time::timeout(timeout, task).await {
            Ok(handle) => handle,
            Err(_) => {
                debug!(
                    key = %key,
                    timeout = ?timeout,
                    "prewarm still running, proceeding uncached"
                );
                None
            }
        }
    }

    /// Whether `key` is permanently suppressed.
    pub fn is_suppressed(&self, key: &CacheKey) -> bool {
        self.inner.tracker.is_suppressed(key)
    }

    /// Suppression reason, else last transient failure, else empty.
    pub fn failure_reason(&self, key: &CacheKey) -> String {
        self.inner.tracker.failure_reason(key)
    }

    /// Snapshot of registry, suppressions, pending keys and recent failures.
    pub fn diagnostics(&self) -> CacheDiagnostics {
        CacheDiagnostics {
            registry: self
                .inner
                .registry
                .snapshot()
                .into_iter()
                .map(|(key, handle)| (key.to_string(), handle))
                .collect(),
            suppressed: self.inner.tracker.suppressed_keys(),
            pending: self.inner.pending.keys(),
            recent_failures: self.inner.tracker.recent_failures(),
        }
    }
}
