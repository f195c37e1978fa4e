//! Integration tests for SqliteTrackingStore
//!
//! Each test gets a fresh in-memory database.

use std::path::{Path, PathBuf};

use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::domain::{FileHash, FolderPath, RemoteId, TrackingEntry};
use partsync_core::ports::ITrackingStore;

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteTrackingStore {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteTrackingStore::new(pool.pool().clone())
}

fn hash(c: char) -> FileHash {
    FileHash::new(c.to_string().repeat(64)).unwrap()
}

fn entry(path: &str, h: char, remote: &str) -> TrackingEntry {
    let p = PathBuf::from(path);
    let name = p.file_stem().unwrap().to_string_lossy().into_owned();
    TrackingEntry::new(
        p,
        hash(h),
        RemoteId::new(remote.to_string()).unwrap(),
        name,
        FolderPath::root(),
    )
}

// ============================================================================
// Basic CRUD
// ============================================================================

#[tokio::test]
async fn test_upsert_and_get_by_path() {
    let store = setup().await;
    let e = entry("/w/A/model.3mf", 'a', "part-1");
    store.upsert(&e).await.unwrap();

    let loaded = store
        .get_by_path(Path::new("/w/A/model.3mf"))
        .await
        .unwrap()
        .expect("entry exists");
    assert_eq!(loaded.remote_id, e.remote_id);
    assert_eq!(loaded.content_hash, e.content_hash);
    assert_eq!(loaded.logical_name, "model");

    assert!(store
        .get_by_path(Path::new("/w/other.stl"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_upsert_replaces_existing_row() {
    let store = setup().await;
    store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();
    store.upsert(&entry("/w/a.stl", 'b', "p2")).await.unwrap();

    assert_eq!(store.count().await.unwrap(), 1);
    let loaded = store.get_by_path(Path::new("/w/a.stl")).await.unwrap().unwrap();
    assert_eq!(loaded.remote_id.as_str(), "p2");
    assert_eq!(loaded.content_hash, hash('b'));
}

#[tokio::test]
async fn test_get_by_hash_returns_all_matches() {
    let store = setup().await;
    store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();
    store.upsert(&entry("/w/copy.stl", 'a', "p2")).await.unwrap();
    store.upsert(&entry("/w/b.stl", 'b', "p3")).await.unwrap();

    let matches = store.get_by_hash(&hash('a')).await.unwrap();
    assert_eq!(matches.len(), 2);
    assert_eq!(matches[0].file_path, PathBuf::from("/w/a.stl"));
    assert!(store.get_by_hash(&hash('c')).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_get_by_remote_id() {
    let store = setup().await;
    store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();

    let id = RemoteId::new("p1".into()).unwrap();
    let matches = store.get_by_remote_id(&id).await.unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].file_path, PathBuf::from("/w/a.stl"));
}

// ============================================================================
// Path and hash updates
// ============================================================================

#[tokio::test]
async fn test_update_path_preserves_identity() {
    let store = setup().await;
    let original = entry("/w/A/model.3mf", 'a', "part-x");
    store.upsert(&original).await.unwrap();

    let b: FolderPath = "B".parse().unwrap();
    let moved = store
        .update_path(
            Path::new("/w/A/model.3mf"),
            Path::new("/w/B/model.3mf"),
            &b,
            "model",
        )
        .await
        .unwrap();
    assert!(moved);

    assert!(store
        .get_by_path(Path::new("/w/A/model.3mf"))
        .await
        .unwrap()
        .is_none());
    let loaded = store
        .get_by_path(Path::new("/w/B/model.3mf"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.remote_id.as_str(), "part-x");
    assert_eq!(loaded.content_hash, hash('a'));
    assert_eq!(loaded.folder_path, b);
    assert_eq!(loaded.created_at, original.created_at);
}

#[tokio::test]
async fn test_update_path_replaces_row_at_destination() {
    let store = setup().await;
    store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();
    store.upsert(&entry("/w/b.stl", 'b', "p2")).await.unwrap();

    let moved = store
        .update_path(Path::new("/w/a.stl"), Path::new("/w/b.stl"), &FolderPath::root(), "b")
        .await
        .unwrap();
    assert!(moved);
    assert_eq!(store.count().await.unwrap(), 1);
    let loaded = store.get_by_path(Path::new("/w/b.stl")).await.unwrap().unwrap();
    assert_eq!(loaded.remote_id.as_str(), "p1");
}

#[tokio::test]
async fn test_update_path_missing_source_leaves_destination() {
    let store = setup().await;
    store.upsert(&entry("/w/b.stl", 'b', "p2")).await.unwrap();

    let moved = store
        .update_path(Path::new("/w/ghost.stl"), Path::new("/w/b.stl"), &FolderPath::root(), "b")
        .await
        .unwrap();
    assert!(!moved);
    // Rolled back: the destination row is still there
    assert!(store.get_by_path(Path::new("/w/b.stl")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_update_hash_keeps_remote_id() {
    let store = setup().await;
    store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();

    assert!(store.update_hash(Path::new("/w/a.stl"), &hash('f')).await.unwrap());
    let loaded = store.get_by_path(Path::new("/w/a.stl")).await.unwrap().unwrap();
    assert_eq!(loaded.content_hash, hash('f'));
    assert_eq!(loaded.remote_id.as_str(), "p1");

    assert!(!store
        .update_hash(Path::new("/w/none.stl"), &hash('f'))
        .await
        .unwrap());
}

// ============================================================================
// Deletion and listing
// ============================================================================

#[tokio::test]
async fn test_delete_and_delete_by_remote_id() {
    let store = setup().await;
    store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();
    store.upsert(&entry("/w/b.stl", 'b', "p2")).await.unwrap();
    store.upsert(&entry("/w/c.stl", 'c', "p2")).await.unwrap();

    assert!(store.delete(Path::new("/w/a.stl")).await.unwrap());
    assert!(!store.delete(Path::new("/w/a.stl")).await.unwrap());

    let removed = store
        .delete_by_remote_id(&RemoteId::new("p2".into()).unwrap())
        .await
        .unwrap();
    assert_eq!(removed, 2);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_all_sorted_by_path() {
    let store = setup().await;
    store.upsert(&entry("/w/z.stl", 'a', "p1")).await.unwrap();
    store.upsert(&entry("/w/a.stl", 'b', "p2")).await.unwrap();

    let all = store.list_all().await.unwrap();
    let paths: Vec<_> = all.iter().map(|e| e.file_path.clone()).collect();
    assert_eq!(paths, vec![PathBuf::from("/w/a.stl"), PathBuf::from("/w/z.stl")]);
}

#[tokio::test]
async fn test_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tracking.db");

    {
        let pool = DatabasePool::new(&db).await.unwrap();
        let store = SqliteTrackingStore::new(pool.pool().clone());
        store.upsert(&entry("/w/a.stl", 'a', "p1")).await.unwrap();
        pool.close().await;
    }

    let pool = DatabasePool::new(&db).await.unwrap();
    let store = SqliteTrackingStore::new(pool.pool().clone());
    assert_eq!(store.count().await.unwrap(), 1);
}
