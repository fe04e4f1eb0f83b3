//! In-flight prewarm bookkeeping.
//!
//! Each running cache creation is registered under its key together with a
//! process-unique task id. Completion removes the entry with a
//! compare-and-delete on that id, so a task that has been superseded can
//! never evict its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::future::{BoxFuture, Shared};
use tokio::task::AbortHandle;

use crate::types::CacheKey;

/// Joinable result of a background cache creation.
///
/// Cloning is cheap; every clone resolves to the same handle (or `None`).
/// Dropping a clone, or timing out while awaiting it, does not cancel the
/// underlying work.
pub type PrewarmTask = Shared<BoxFuture<'static, Option<String>>>;

struct Pending {
    id: u64,
    task: PrewarmTask,
    abort: AbortHandle,
}

impl Pending {
    fn is_running(&self) -> bool {
        !self.abort.is_finished()
    }
}

/// Map of keys to the creation task currently running for them.
#[derive(Default)]
pub(crate) struct PendingPrewarms {
    tasks: Mutex<HashMap<CacheKey, Pending>>,
    next_id: AtomicU64,
}

impl PendingPrewarms {
    /// Running task for `key`, if there is one.
    pub(crate) fn running(&self, key: &CacheKey) -> Option<PrewarmTask> {
        self.lock()
            .get(key)
            .filter(|p| p.is_running())
            .map(|p| p.task.clone())
    }

    /// Return the running task for `key`, or start one.
    ///
    /// `start` receives the id the new task must pass to [`complete`] and is
    /// called with the map locked, so two callers can never both start.
    /// The flag is `true` when an existing task was joined.
    ///
    /// [`complete`]: Self::complete
    pub(crate) fn join_or_start<F>(&self, key: &CacheKey, start: F) -> (PrewarmTask, bool)
    where
        F: FnOnce(u64) -> (PrewarmTask, AbortHandle),
    {
        let mut tasks = self.lock();
        if let Some(existing) = tasks.get(key).filter(|p| p.is_running()) {
            return (existing.task.clone(), true);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (task, abort) = start(id);
        tasks.insert(
            key.clone(),
            Pending {
                id,
                task: task.clone(),
                abort,
            },
        );
        (task, false)
    }

    /// Remove `key` only if it is still registered to task `id`.
    pub(crate) fn complete(&self, key: &CacheKey, id: u64) -> bool {
        let mut tasks = self.lock();
        if tasks.get(key).is_some_and(|p| p.id == id) {
            tasks.remove(key);
            true
        } else {
            false
        }
    }

    /// Keys with a running task, sorted.
    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, p)| p.is_running())
            .map(|(k, _)| k.to_string())
            .collect();
        keys.sort();
        keys
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Pending>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
