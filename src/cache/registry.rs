//! Durable `(content_id, model) → handle` registry.
//!
//! The in-memory map is the source of truth for the running process; a JSON
//! snapshot on disk lets handles survive restarts. The file is a single
//! compact object mapping `content_id/model` to a handle, written oldest
//! entry first, so write order survives a round trip and garbage collection
//! can drop the least recently written entries.
//!
//! Loading never fails the caller: a missing file is an empty registry, and
//! unreadable or corrupt files surface as [`RegistryLoadError`] which
//! [`CacheRegistry::open`] logs and discards.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::types::CacheKey;

/// Default cap on registry entries, in memory and on disk.
pub const MAX_REGISTRY_ENTRIES: usize = 500;

/// Why a persisted registry could not be used.
#[derive(Debug, thiserror::Error)]
pub enum RegistryLoadError {
    #[error("failed to read registry file: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt registry file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
struct Slot {
    handle: String,
    written: u64,
}

/// Process-wide registry of cache handles.
///
/// Every mutation touches a single map entry under a short write lock; disk
/// writes happen after the lock is released, serialised by a separate save
/// lock so concurrent snapshots never interleave in the temp file.
pub struct CacheRegistry {
    entries: RwLock<HashMap<CacheKey, Slot>>,
    clock: AtomicU64,
    max_entries: usize,
    path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl CacheRegistry {
    /// Registry without persistence.
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock: AtomicU64::new(0),
            max_entries: max_entries.max(1),
            path: None,
            save_lock: Mutex::new(()),
        }
    }

    /// Registry mirrored to `path`, seeded from whatever is there now.
    pub fn open(path: impl Into<PathBuf>, max_entries: usize) -> Self {
        let path = path.into();
        let mut registry = Self::in_memory(max_entries);
        match load_registry(&path) {
            Ok(pairs) => {
                debug!(path = %path.display(), count = pairs.len(), "loaded cache registry");
                for (key, handle) in pairs {
                    registry.put(key, handle);
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unusable cache registry");
            }
        }
        registry.path = Some(path);
        registry
    }

    /// Handle recorded for `key`, if any. No remote call.
    pub fn lookup(&self, key: &CacheKey) -> Option<String> {
        self.read().get(key).map(|slot| slot.handle.clone())
    }

    /// Record `handle` for `key`, replacing any previous entry, then persist.
    pub fn insert(&self, key: CacheKey, handle: String) {
        self.put(key, handle);
        self.save();
    }

    /// Remove `key` only if it still maps to `handle`.
    ///
    /// A stale-handle eviction must not clobber a newer handle that another
    /// task recorded in the meantime.
    pub fn remove_if(&self, key: &CacheKey, handle: &str) -> bool {
        let removed = {
            let mut entries = self.write();
            match entries.get(key) {
                Some(slot) if slot.handle == handle => entries.remove(key).is_some(),
                _ => false,
            }
        };
        if removed {
            self.save();
        }
        removed
    }

    /// Key currently pointing at `handle`.
    pub fn key_for_handle(&self, handle: &str) -> Option<CacheKey> {
        self.read()
            .iter()
            .find(|(_, slot)| slot.handle == handle)
            .map(|(key, _)| key.clone())
    }

    /// Remove and return every entry, oldest first, and persist the empty map.
    pub fn drain(&self) -> Vec<(CacheKey, String)> {
        let mut slots: Vec<(CacheKey, Slot)> = self.write().drain().collect();
        self.save();
        slots.sort_by_key(|(_, slot)| slot.written);
        slots.into_iter().map(|(k, slot)| (k, slot.handle)).collect()
    }

    /// All entries, oldest write first.
    pub fn snapshot(&self) -> Vec<(CacheKey, String)> {
        let mut slots: Vec<(CacheKey, Slot)> = self
            .read()
            .iter()
            .map(|(k, slot)| (k.clone(), slot.clone()))
            .collect();
        slots.sort_by_key(|(_, slot)| slot.written);
        slots.into_iter().map(|(k, slot)| (k, slot.handle)).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured entry cap.
    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Write the current snapshot to disk, if persistence is configured.
    ///
    /// Failures are logged, never returned.
    pub fn save(&self) {
        let Some(path) = &self.path else {
            return;
        };
        // Snapshot under the save lock so a later write never loses to an
        // earlier snapshot.
        let _guard = self.save_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.snapshot();
        if let Err(e) = save_registry(path, &snapshot, self.max_entries) {
            warn!(path = %path.display(), error = %e, "failed to save cache registry");
        }
    }

    /// Insert without persisting, evicting the oldest write when over the cap.
    fn put(&self, key: CacheKey, handle: String) {
        let written = self.clock.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.write();
        entries.insert(key, Slot { handle, written });
        if entries.len() > self.max_entries {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, slot)| slot.written)
                .map(|(k, _)| k.clone())
            {
                debug!(key = %oldest, "evicting oldest registry entry");
                entries.remove(&oldest);
            }
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<CacheKey, Slot>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<CacheKey, Slot>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// File format
// ============================================================================

/// Load `(key, handle)` pairs in file order.
///
/// A missing file is an empty registry. Entries whose key does not parse or
/// whose value is not a string are skipped.
pub fn load_registry(path: &Path) -> Result<Vec<(CacheKey, String)>, RegistryLoadError> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let map: Map<String, Value> = serde_json::from_str(&content)?;
    Ok(map
        .into_iter()
        .filter_map(|(k, v)| match (CacheKey::parse(&k), v) {
            (Some(key), Value::String(handle)) => Some((key, handle)),
            _ => {
                debug!(entry = %k, "skipping malformed registry entry");
                None
            }
        })
        .collect())
}

/// Save pairs (oldest first), keeping only the newest `max_entries`.
///
/// Written to a temp file and renamed into place.
pub fn save_registry(
    path: &Path,
    entries: &[(CacheKey, String)],
    max_entries: usize,
) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let skip = entries.len().saturating_sub(max_entries);
    let map: Map<String, Value> = entries[skip..]
        .iter()
        .map(|(key, handle)| (key.to_string(), Value::String(handle.clone())))
        .collect();
    let json = serde_json::to_string(&map)?;

    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)
}
