//! Shared mock remote cache backend for integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mimir::types::ContentPart;
use mimir::{CacheDescriptor, RemoteCacheError, RemoteCacheService};
use tokio::sync::Semaphore;

/// What the next `create` calls should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Succeed,
    TooSmall,
    Transient,
}

/// In-memory backend with call counters and an optional gate that holds
/// `create` until [`MockRemote::release`] is called.
pub struct MockRemote {
    create_calls: AtomicU32,
    get_calls: AtomicU32,
    update_calls: AtomicU32,
    delete_calls: AtomicU32,
    next_id: AtomicU32,
    live: Mutex<HashSet<String>>,
    created_models: Mutex<Vec<String>>,
    outcome: Mutex<CreateOutcome>,
    fail_updates: AtomicBool,
    gated: AtomicBool,
    gate: Semaphore,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            create_calls: AtomicU32::new(0),
            get_calls: AtomicU32::new(0),
            update_calls: AtomicU32::new(0),
            delete_calls: AtomicU32::new(0),
            next_id: AtomicU32::new(1),
            live: Mutex::new(HashSet::new()),
            created_models: Mutex::new(Vec::new()),
            outcome: Mutex::new(CreateOutcome::Succeed),
            fail_updates: AtomicBool::new(false),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
        }
    }

    /// A backend whose creations block until released.
    pub fn gated() -> Self {
        let mock = Self::new();
        mock.gated.store(true, Ordering::SeqCst);
        mock
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(Semaphore::MAX_PERMITS / 2);
    }

    pub fn set_outcome(&self, outcome: CreateOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Forget a handle server-side, as if its lease ran out.
    pub fn expire(&self, handle: &str) {
        self.live.lock().unwrap().remove(handle);
    }

    pub fn is_live(&self, handle: &str) -> bool {
        self.live.lock().unwrap().contains(handle)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> u32 {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u32 {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Total remote calls of any kind.
    pub fn total_calls(&self) -> u32 {
        self.create_calls() + self.get_calls() + self.update_calls() + self.delete_calls()
    }

    pub fn created_models(&self) -> Vec<String> {
        self.created_models.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteCacheService for MockRemote {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create(
        &self,
        model: &str,
        _parts: &[ContentPart],
        _ttl: Duration,
    ) -> Result<CacheDescriptor, RemoteCacheError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            let _permit = self.gate.acquire().await.unwrap();
        }
        self.created_models.lock().unwrap().push(model.to_string());

        let outcome = *self.outcome.lock().unwrap();
        match outcome {
            CreateOutcome::Succeed => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let name = format!("cachedContents/mock{id}");
                self.live.lock().unwrap().insert(name.clone());
                Ok(CacheDescriptor::named(name))
            }
            CreateOutcome::TooSmall => Err(RemoteCacheError::BelowMinimumSize(
                "Cached content is too small. total_token_count=12, min_total_token_count=4096"
                    .into(),
            )),
            CreateOutcome::Transient => {
                Err(RemoteCacheError::Transient("HTTP 503: backend unavailable".into()))
            }
        }
    }

    async fn get(&self, handle: &str) -> Result<CacheDescriptor, RemoteCacheError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.is_live(handle) {
            Ok(CacheDescriptor::named(handle))
        } else {
            Err(RemoteCacheError::NotFound(handle.to_string()))
        }
    }

    async fn update(&self, handle: &str, _ttl: Duration) -> Result<(), RemoteCacheError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(RemoteCacheError::Transient("HTTP 500: internal".into()));
        }
        if self.is_live(handle) {
            Ok(())
        } else {
            Err(RemoteCacheError::NotFound(handle.to_string()))
        }
    }

    async fn delete(&self, handle: &str) -> Result<(), RemoteCacheError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.live.lock().unwrap().remove(handle) {
            Ok(())
        } else {
            Err(RemoteCacheError::NotFound(handle.to_string()))
        }
    }
}

/// A single video part, the usual cacheable payload.
pub fn video_parts(id: &str) -> Vec<ContentPart> {
    vec![ContentPart::file(
        format!("https://www.youtube.com/watch?v={id}"),
        "video/*",
    )]
}
