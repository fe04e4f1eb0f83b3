//! Integration tests for the on-disk cache registry.

use mimir::CacheKey;
use mimir::cache::registry::{self, CacheRegistry, MAX_REGISTRY_ENTRIES, RegistryLoadError};

fn key(n: usize) -> CacheKey {
    CacheKey::new(format!("video{n}"), "gemini-2.0-flash")
}

#[test]
fn registry_is_bounded_across_restarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context_caches.json");

    {
        let registry = CacheRegistry::open(&path, MAX_REGISTRY_ENTRIES);
        for n in 0..MAX_REGISTRY_ENTRIES + 50 {
            registry.insert(key(n), format!("cachedContents/{n}"));
        }
        assert_eq!(registry.len(), MAX_REGISTRY_ENTRIES);
    }

    let reloaded = CacheRegistry::open(&path, MAX_REGISTRY_ENTRIES);
    assert_eq!(reloaded.len(), MAX_REGISTRY_ENTRIES);
    // The oldest writes are the ones dropped.
    assert_eq!(reloaded.lookup(&key(0)), None);
    assert_eq!(reloaded.lookup(&key(49)), None);
    assert_eq!(reloaded.lookup(&key(50)), Some("cachedContents/50".into()));
    assert_eq!(
        reloaded.lookup(&key(MAX_REGISTRY_ENTRIES + 49)),
        Some(format!("cachedContents/{}", MAX_REGISTRY_ENTRIES + 49))
    );
}

#[test]
fn file_is_flat_key_to_handle_map() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context_caches.json");

    let registry = CacheRegistry::open(&path, 10);
    registry.insert(key(1), "cachedContents/a".into());
    registry.insert(CacheKey::new("video2", "gemini-1.5-pro"), "cachedContents/b".into());

    let raw: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(raw["video1/gemini-2.0-flash"], "cachedContents/a");
    assert_eq!(raw["video2/gemini-1.5-pro"], "cachedContents/b");
    assert_eq!(raw.as_object().unwrap().len(), 2);
}

#[test]
fn malformed_entries_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context_caches.json");
    std::fs::write(
        &path,
        r#"{"video1/gemini-2.0-flash":"cachedContents/a","no-slash":"x","video2/m":42}"#,
    )
    .unwrap();

    let entries = registry::load_registry(&path).unwrap();
    assert_eq!(
        entries,
        vec![(key(1), "cachedContents/a".to_string())]
    );
}

#[test]
fn missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let entries = registry::load_registry(&dir.path().join("absent.json")).unwrap();
    assert!(entries.is_empty());
}

#[test]
fn corrupt_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context_caches.json");
    std::fs::write(&path, "[1, 2").unwrap();

    let err = registry::load_registry(&path).unwrap_err();
    assert!(matches!(err, RegistryLoadError::Corrupt(_)));
}

#[test]
fn drain_empties_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("context_caches.json");

    let registry = CacheRegistry::open(&path, 10);
    registry.insert(key(1), "cachedContents/a".into());
    registry.insert(key(2), "cachedContents/b".into());

    let drained = registry.drain();
    assert_eq!(drained.len(), 2);
    assert_eq!(drained[0].0, key(1));
    assert!(registry::load_registry(&path).unwrap().is_empty());
}

#[test]
fn concurrent_inserts_all_reach_disk() {
    use std::sync::Barrier;

    const WRITERS: usize = 8;
    let dir = tempfile::tempdir().unwrap();

    for round in 0..50 {
        let path = dir.path().join(format!("round{round}.json"));
        let registry = CacheRegistry::open(&path, MAX_REGISTRY_ENTRIES);
        let barrier = Barrier::new(WRITERS);

        std::thread::scope(|s| {
            for n in 0..WRITERS {
                let registry = &registry;
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    registry.insert(key(n), format!("cachedContents/{n}"));
                });
            }
        });

        let reloaded = CacheRegistry::open(&path, MAX_REGISTRY_ENTRIES);
        assert_eq!(reloaded.len(), WRITERS, "round {round} lost entries on disk");
    }
}
