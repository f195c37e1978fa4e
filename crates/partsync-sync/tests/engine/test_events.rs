//! Watcher-event handling: grace period, renames, new files

use std::time::Duration;

use partsync_sync::scheduler::EventSink;
use partsync_sync::watcher::ChangeEvent;

use crate::common::{harness, harness_with, hash, Call, FakePartsApi};

#[tokio::test]
async fn test_delete_then_identical_recreate_is_silent() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("A/model.3mf", b"saved");
    h.engine.run_once().await.unwrap();
    api.clear_calls();

    std::fs::remove_file(&path).unwrap();
    let rewrite = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::fs::write(&path, b"saved").unwrap();
        })
    };
    h.engine
        .handle_event(ChangeEvent::Deleted(path.clone()))
        .await
        .unwrap();
    rewrite.await.unwrap();
    h.engine.pipelines().drain().await;

    assert!(api.mutations().is_empty(), "unexpected {:?}", api.mutations());
    assert!(h.tracking.get_by_path(&path).await.unwrap().is_some());
}

#[tokio::test]
async fn test_delete_then_changed_recreate_is_one_update() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("A/model.3mf", b"saved");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&path).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    std::fs::remove_file(&path).unwrap();
    let rewrite = {
        let path = path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            std::fs::write(&path, b"saved again, different bytes").unwrap();
        })
    };
    h.engine
        .handle_event(ChangeEvent::Deleted(path.clone()))
        .await
        .unwrap();
    rewrite.await.unwrap();
    h.engine.pipelines().drain().await;

    assert_eq!(
        api.mutations(),
        vec![Call::UpdateContent {
            id: id.as_str().to_string(),
            hash: hash(b"saved again, different bytes").as_str().to_string(),
        }]
    );
}

#[tokio::test]
async fn test_full_resync_inside_grace_window_keeps_part() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness_with(api.clone(), |s| s.grace_period = Duration::from_millis(400)).await;
    let path = h.write("A/model.3mf", b"saved");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&path).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    std::fs::remove_file(&path).unwrap();
    let (deleted, resynced) = tokio::join!(
        h.engine.handle_event(ChangeEvent::Deleted(path.clone())),
        async {
            while !h.engine.grace().is_pending(&path) {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            let report = h.engine.full_sync().await;
            std::fs::write(&path, b"saved").unwrap();
            report
        },
    );
    deleted.unwrap();
    let report = resynced.unwrap();
    assert_eq!(report.deletes, 0);
    assert_eq!(h.engine.pipelines().pending_deletes().await, 0);
    h.engine.pipelines().drain().await;

    assert!(api.mutations().is_empty(), "unexpected {:?}", api.mutations());
    assert_eq!(h.tracking.get_by_path(&path).await.unwrap().unwrap().remote_id, id);
}

#[tokio::test]
async fn test_queued_delete_dropped_when_file_claims_part() {
    let (api, root) = FakePartsApi::with_root();
    let folder_a = api.add_folder("A", Some(&root));
    let orphan = api.add_part("model", &folder_a, &hash(b"bytes"), None);
    let h = harness(api.clone()).await;

    let report = h.engine.full_sync().await.unwrap();
    assert_eq!(report.deletes, 1);
    assert_eq!(h.engine.pipelines().pending_deletes().await, 1);

    let path = h.write("A/model.3mf", b"bytes");
    h.engine
        .handle_event(ChangeEvent::Created(path.clone()))
        .await
        .unwrap();
    h.engine.pipelines().drain().await;

    assert!(!api.mutations().iter().any(|c| matches!(c, Call::DeletePart(_))));
    assert!(api.part(&orphan).is_some());
    assert_eq!(
        h.tracking.get_by_path(&path).await.unwrap().unwrap().remote_id.as_str(),
        orphan
    );
    assert_eq!(h.engine.stats().deletes_completed, 0);
}

#[tokio::test]
async fn test_confirmed_delete_removes_part_and_tracking() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("A/model.3mf", b"saved");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&path).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    std::fs::remove_file(&path).unwrap();
    h.engine
        .handle_event(ChangeEvent::Deleted(path.clone()))
        .await
        .unwrap();
    assert_eq!(h.engine.pipelines().pending_deletes().await, 1);
    h.engine.pipelines().drain().await;

    assert_eq!(api.mutations(), vec![Call::DeletePart(id.as_str().to_string())]);
    assert!(h.tracking.get_by_path(&path).await.unwrap().is_none());
    assert_eq!(h.engine.stats().deletes_completed, 1);
}

#[tokio::test]
async fn test_directory_delete_watches_every_tracked_file() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    h.write("X/a.stl", b"a");
    h.write("X/b.stl", b"b");
    h.write("keep.stl", b"k");
    h.engine.run_once().await.unwrap();

    let dir = h.root().join("X");
    std::fs::remove_dir_all(&dir).unwrap();
    h.engine.handle_event(ChangeEvent::Deleted(dir)).await.unwrap();

    assert_eq!(h.engine.pipelines().pending_deletes().await, 2);
}

#[tokio::test]
async fn test_rename_event_moves_part_inline() {
    let (api, root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let old = h.write("A/model.3mf", b"bytes");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&old).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    std::fs::create_dir_all(h.root().join("B")).unwrap();
    let new = h.root().join("B/model.3mf");
    std::fs::rename(&old, &new).unwrap();
    h.engine
        .handle_event(ChangeEvent::Renamed {
            old: old.clone(),
            new: new.clone(),
        })
        .await
        .unwrap();

    let folder_b = api.folder_named("B", Some(&root)).unwrap();
    assert_eq!(
        api.mutations(),
        vec![
            Call::CreateFolder {
                name: "B".into(),
                parent: Some(root.clone()),
            },
            Call::MovePart {
                id: id.as_str().to_string(),
                folder: folder_b.id.as_str().to_string(),
            },
        ]
    );

    // The follow-up upload finds the content already current
    h.engine.pipelines().drain().await;
    assert_eq!(api.mutations().len(), 2);

    let entry = h.tracking.get_by_path(&new).await.unwrap().unwrap();
    assert_eq!(entry.remote_id, id);
    assert!(h.tracking.get_by_path(&old).await.unwrap().is_none());
}

#[tokio::test]
async fn test_new_file_at_renamed_files_old_name_gets_own_part() {
    let (api, root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let old = h.write("a.stl", b"first");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&old).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    let renamed = h.root().join("b.stl");
    std::fs::rename(&old, &renamed).unwrap();
    h.engine
        .handle_event(ChangeEvent::Renamed {
            old: old.clone(),
            new: renamed.clone(),
        })
        .await
        .unwrap();
    h.write("a.stl", b"second");
    h.engine
        .handle_event(ChangeEvent::Created(old.clone()))
        .await
        .unwrap();
    h.engine.pipelines().drain().await;

    assert_eq!(
        api.mutations(),
        vec![Call::CreatePart {
            name: "a".into(),
            folder: root.clone(),
        }]
    );
    assert_eq!(h.tracking.get_by_path(&renamed).await.unwrap().unwrap().remote_id, id);
    let fresh = h.tracking.get_by_path(&old).await.unwrap().unwrap().remote_id;
    assert_ne!(fresh, id);

    // Both parts now share the remote name; neither is a duplicate
    api.clear_calls();
    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.conflicts, 0);
    assert!(api.mutations().is_empty(), "unexpected {:?}", api.mutations());
}

#[tokio::test]
async fn test_unpaired_delete_and_create_is_a_move() {
    let (api, root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let old = h.write("A/model.3mf", b"bytes");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&old).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    std::fs::create_dir_all(h.root().join("B")).unwrap();
    let new = h.root().join("B/model.3mf");
    std::fs::rename(&old, &new).unwrap();

    let (deleted, created) = tokio::join!(
        h.engine.handle_event(ChangeEvent::Deleted(old.clone())),
        h.engine.handle_event(ChangeEvent::Created(new.clone())),
    );
    deleted.unwrap();
    created.unwrap();
    h.engine.pipelines().drain().await;

    let folder_b = api.folder_named("B", Some(&root)).unwrap();
    let mutations = api.mutations();
    assert!(mutations.contains(&Call::MovePart {
        id: id.as_str().to_string(),
        folder: folder_b.id.as_str().to_string(),
    }));
    assert!(!mutations
        .iter()
        .any(|c| matches!(c, Call::CreatePart { .. } | Call::DeletePart(_))));
    assert_eq!(
        h.tracking.get_by_path(&new).await.unwrap().unwrap().remote_id,
        id
    );
}

#[tokio::test]
async fn test_new_file_event_uploads() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("fresh.step", b"step data");

    h.engine
        .handle_event(ChangeEvent::Created(path.clone()))
        .await
        .unwrap();
    assert_eq!(h.engine.pipelines().pending_uploads().await, 1);
    h.engine.pipelines().drain().await;

    let parts = api.parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].name, "fresh");
    assert!(h.tracking.get_by_path(&path).await.unwrap().is_some());
}

#[tokio::test]
async fn test_non_model_files_ignored() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("notes.txt", b"hello");

    h.engine
        .handle_event(ChangeEvent::Modified(path))
        .await
        .unwrap();
    assert_eq!(h.engine.pipelines().pending_uploads().await, 0);
    assert!(api.calls().is_empty());
}
