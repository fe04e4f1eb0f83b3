//! Session store: bounded history, capacity, expiry and SQLite resumption.

use std::time::Duration;

use mimir::types::Turn;
use mimir::{MimirError, NewSession, SessionConfig, SessionDb, SessionStore};

fn video() -> NewSession {
    NewSession::new("https://www.youtube.com/watch?v=abc", "general").content_id("abc")
}

#[tokio::test]
async fn history_keeps_latest_turns() {
    let store = SessionStore::new(SessionConfig::new().max_turns(2));
    let session = store.create(video()).await;

    for i in 1..=3 {
        let count = store
            .add_turn(
                &session.session_id,
                Turn::user(format!("q{i}")),
                Turn::model(format!("a{i}")),
            )
            .await
            .unwrap();
        assert_eq!(count, i);
    }

    let session = store.get(&session.session_id).await.unwrap();
    let texts: Vec<String> = session.history.iter().map(Turn::text).collect();
    assert_eq!(texts, vec!["q2", "a2", "q3", "a3"]);
    assert_eq!(session.turn_count, 3);
}

#[tokio::test]
async fn unknown_session_is_user_facing_error() {
    let store = SessionStore::new(SessionConfig::default());
    let err = store
        .add_turn("missing", Turn::user("q"), Turn::model("a"))
        .await
        .unwrap_err();

    assert!(matches!(err, MimirError::SessionNotFound(ref id) if id == "missing"));
    assert!(err.is_user_facing());
    assert!(store.get("missing").await.is_none());
}

#[tokio::test]
async fn capacity_evicts_least_recently_active() {
    let store = SessionStore::new(SessionConfig::new().max_sessions(2));
    let first = store.create(video()).await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    let second = store.create(video()).await;
    tokio::time::sleep(Duration::from_millis(2)).await;

    // Touch the first so the second becomes the oldest.
    store
        .add_turn(&first.session_id, Turn::user("q"), Turn::model("a"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    let third = store.create(video()).await;

    assert_eq!(store.len(), 2);
    assert!(store.get(&first.session_id).await.is_some());
    assert!(store.get(&second.session_id).await.is_none());
    assert!(store.get(&third.session_id).await.is_some());
}

#[tokio::test]
async fn idle_sessions_expire() {
    let store = SessionStore::new(SessionConfig::new().timeout(Duration::from_millis(10)));
    let session = store.create(video()).await;
    assert!(store.get(&session.session_id).await.is_some());

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(store.get(&session.session_id).await.is_none());
    assert!(store.is_empty());
}

#[tokio::test]
async fn cache_attach_and_detach() {
    let store = SessionStore::new(SessionConfig::default());
    let session = store.create(video()).await;
    assert!(!session.is_cached());

    store
        .attach_cache(
            &session.session_id,
            "cachedContents/1".into(),
            "gemini-2.0-flash".into(),
        )
        .await
        .unwrap();
    let cached = store.get(&session.session_id).await.unwrap();
    assert_eq!(cached.cache_handle.as_deref(), Some("cachedContents/1"));

    store.detach_cache(&session.session_id).await.unwrap();
    let detached = store.get(&session.session_id).await.unwrap();
    assert!(detached.cache_handle.is_none());
    assert_eq!(detached.model.as_deref(), Some("gemini-2.0-flash"));
}

#[tokio::test]
async fn remove_deletes_session() {
    let store = SessionStore::new(SessionConfig::default());
    let session = store.create(video()).await;

    assert!(store.remove(&session.session_id).await);
    assert!(!store.remove(&session.session_id).await);
    assert!(store.get(&session.session_id).await.is_none());
}

// ============================================================================
// Persistence
// ============================================================================

#[tokio::test]
async fn sessions_resume_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig::new().db_path(dir.path().join("sessions.db"));

    let id = {
        let store = SessionStore::new(config.clone());
        assert!(store.is_persistent());
        let session = store
            .create(video().title("Knife skills").cache("cachedContents/1", "gemini-2.0-flash"))
            .await;
        store
            .add_turn(&session.session_id, Turn::user("q1"), Turn::model("a1"))
            .await
            .unwrap();
        session.session_id
    };

    let store = SessionStore::new(config);
    assert!(store.is_empty());
    let resumed = store.get(&id).await.expect("session should reload");
    assert_eq!(resumed.title, "Knife skills");
    assert_eq!(resumed.cache_handle.as_deref(), Some("cachedContents/1"));
    assert_eq!(resumed.history, vec![Turn::user("q1"), Turn::model("a1")]);
    assert_eq!(resumed.turn_count, 1);

    let count = store
        .add_turn(&id, Turn::user("q2"), Turn::model("a2"))
        .await
        .unwrap();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn expired_persisted_session_is_deleted_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");

    let id = {
        let store = SessionStore::new(SessionConfig::new().db_path(&path));
        store.create(video()).await.session_id
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    let store = SessionStore::new(
        SessionConfig::new()
            .db_path(&path)
            .timeout(Duration::from_millis(10)),
    );
    assert!(store.get(&id).await.is_none());

    let db = SessionDb::open(&path).unwrap();
    assert!(db.load(&id).unwrap().is_none());
}

#[tokio::test]
async fn removed_session_does_not_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = SessionConfig::new().db_path(dir.path().join("sessions.db"));

    let id = {
        let store = SessionStore::new(config.clone());
        let id = store.create(video()).await.session_id;
        assert!(store.remove(&id).await);
        id
    };

    let store = SessionStore::new(config);
    assert!(store.get(&id).await.is_none());
}

#[tokio::test]
async fn unusable_database_falls_back_to_memory() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the database file should be.
    let path = dir.path().join("sessions.db");
    std::fs::create_dir(&path).unwrap();

    let store = SessionStore::new(SessionConfig::new().db_path(&path));
    assert!(!store.is_persistent());
    let session = store.create(video()).await;
    assert!(store.get(&session.session_id).await.is_some());
}

#[tokio::test]
async fn capacity_evicted_sessions_are_purged_once_idle() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");
    let store = SessionStore::new(
        SessionConfig::new()
            .db_path(&path)
            .max_sessions(1)
            .timeout(Duration::from_millis(20)),
    );

    for _ in 0..5 {
        store.create(video()).await;
    }
    // Only one stays in memory; the other four live on in the database.
    assert_eq!(store.len(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let latest = store.create(video()).await;

    let rows = SessionDb::open(&path).unwrap().list().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].session_id, latest.session_id);
}
