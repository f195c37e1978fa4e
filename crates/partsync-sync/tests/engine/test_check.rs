//! Dry-run planning

use std::sync::Arc;

use partsync_cache::{DatabasePool, SqliteTrackingStore};
use partsync_core::ports::ITrackingStore;

use crate::common::{harness, FakePartsApi};

async fn scratch() -> (DatabasePool, Arc<dyn ITrackingStore>) {
    let pool = DatabasePool::in_memory().await.unwrap();
    let store: Arc<dyn ITrackingStore> = Arc::new(SqliteTrackingStore::new(pool.pool().clone()));
    (pool, store)
}

#[tokio::test]
async fn test_check_reports_plan_without_mutating() {
    let (api, root) = FakePartsApi::with_root();
    api.add_folder("Empty", Some(&root));
    let h = harness(api.clone()).await;
    h.write("A/model.3mf", b"new");

    let (_pool, store) = scratch().await;
    let report = h.engine.check(store.as_ref()).await.unwrap();

    assert_eq!(report.plan.creates.len(), 1);
    assert_eq!(report.plan.creates[0].logical_name, "model");
    assert_eq!(report.empty_folders.len(), 1);
    assert_eq!(report.empty_folders[0].name, "Empty");
    assert!(api.mutations().is_empty());
}

#[tokio::test]
async fn test_check_leaves_real_tracking_untouched() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let old = h.write("A/model.3mf", b"bytes");
    h.engine.run_once().await.unwrap();
    api.clear_calls();

    std::fs::create_dir_all(h.root().join("B")).unwrap();
    let new = h.root().join("B/model.3mf");
    std::fs::rename(&old, &new).unwrap();

    let (_pool, store) = scratch().await;
    let report = h.engine.check(store.as_ref()).await.unwrap();

    assert_eq!(report.plan.folder_moves.len(), 1);
    assert!(report.plan.creates.is_empty());
    assert!(report.plan.deletes.is_empty());
    assert!(api.mutations().is_empty());

    // Only the scratch copy followed the move
    assert!(h.tracking.get_by_path(&old).await.unwrap().is_some());
    assert!(h.tracking.get_by_path(&new).await.unwrap().is_none());
    assert!(store.get_by_path(&new).await.unwrap().is_some());
}
