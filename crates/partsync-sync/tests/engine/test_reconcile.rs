//! Full-resync behavior: creates, moves, updates, duplicates, adoption

use chrono::{TimeZone, Utc};

use crate::common::{harness, harness_with, hash, Call, FakePartsApi, ROOT_NAME};

#[tokio::test]
async fn test_untracked_file_is_created_under_its_folder() {
    let (api, root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("A/model.3mf", b"h1-content");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.creates, 1);
    assert_eq!(report.deletes, 0);

    let folder_a = api.folder_named("A", Some(&root)).expect("folder A created");
    let parts = api.parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].name, "model");
    assert_eq!(parts[0].folder_id.as_ref(), Some(&folder_a.id));
    assert_eq!(parts[0].content_hash(), Some(hash(b"h1-content")));

    let entry = h.tracking.get_by_path(&path).await.unwrap().unwrap();
    assert_eq!(entry.remote_id, parts[0].id);
    assert_eq!(entry.content_hash, hash(b"h1-content"));
    assert_eq!(entry.logical_name, "model");
}

#[tokio::test]
async fn test_second_run_is_idempotent() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    h.write("A/model.3mf", b"one");
    h.write("B/C/bracket.stl", b"two");
    h.write("top.scad", b"three");

    h.engine.run_once().await.unwrap();
    api.clear_calls();

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(
        (report.creates, report.updates, report.deletes, report.moves),
        (0, 0, 0, 0)
    );
    assert!(api.mutations().is_empty(), "unexpected {:?}", api.mutations());
}

#[tokio::test]
async fn test_move_keeps_remote_identity() {
    let (api, root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let old = h.write("A/model.3mf", b"h1-content");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&old).await.unwrap().unwrap().remote_id;

    std::fs::create_dir_all(h.root().join("B")).unwrap();
    let new = h.root().join("B/model.3mf");
    std::fs::rename(&old, &new).unwrap();
    std::fs::remove_dir(h.root().join("A")).unwrap();
    api.clear_calls();

    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.moves, report.creates, report.deletes), (1, 0, 0));

    let folder_b = api.folder_named("B", Some(&root)).unwrap();
    let part = api.part(id.as_str()).expect("part survives the move");
    assert_eq!(part.folder_id, Some(folder_b.id.clone()));
    assert!(!api
        .mutations()
        .iter()
        .any(|c| matches!(c, Call::CreatePart { .. } | Call::DeletePart(_))));

    let entry = h.tracking.get_by_path(&new).await.unwrap().unwrap();
    assert_eq!(entry.remote_id, id);
    assert!(h.tracking.get_by_path(&old).await.unwrap().is_none());

    // The emptied folder goes on the next resync
    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.folders_deleted, 1);
    assert_eq!(report.passes, 2);
    assert!(api.folder_named("A", Some(&root)).is_none());
    assert!(api.folder_named(ROOT_NAME, None).is_some());
}

#[tokio::test]
async fn test_copy_is_a_create() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    h.write("A/model.3mf", b"same");
    h.engine.run_once().await.unwrap();

    h.write("B/model.3mf", b"same");
    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.creates, report.moves), (1, 0));
    assert_eq!(api.parts().len(), 2);
}

#[tokio::test]
async fn test_content_change_patches_existing_part() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    let path = h.write("A/model.3mf", b"v1");
    h.engine.run_once().await.unwrap();
    let id = h.tracking.get_by_path(&path).await.unwrap().unwrap().remote_id;
    api.clear_calls();

    h.write("A/model.3mf", b"version two, longer");
    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.updates, report.creates, report.deletes), (1, 0, 0));

    assert_eq!(
        api.mutations(),
        vec![Call::UpdateContent {
            id: id.as_str().to_string(),
            hash: hash(b"version two, longer").as_str().to_string(),
        }]
    );
    let entry = h.tracking.get_by_path(&path).await.unwrap().unwrap();
    assert_eq!(entry.remote_id, id);
    assert_eq!(entry.content_hash, hash(b"version two, longer"));
}

#[tokio::test]
async fn test_duplicate_keeps_hash_match_over_newer() {
    let (api, root) = FakePartsApi::with_root();
    let folder_a = api.add_folder("A", Some(&root));
    let matching = api.add_part(
        "model",
        &folder_a,
        &hash(b"local"),
        Some(Utc.timestamp_opt(100, 0).unwrap()),
    );
    let newer = api.add_part(
        "model",
        &folder_a,
        &hash(b"other"),
        Some(Utc.timestamp_opt(999, 0).unwrap()),
    );
    let h = harness(api.clone()).await;
    let path = h.write("A/model.3mf", b"local");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.deletes, report.creates, report.updates), (1, 0, 0));

    assert_eq!(api.mutations(), vec![Call::DeletePart(newer)]);
    let entry = h.tracking.get_by_path(&path).await.unwrap().unwrap();
    assert_eq!(entry.remote_id.as_str(), matching);
}

#[tokio::test]
async fn test_lost_tracking_readopts_remote_part() {
    let (api, root) = FakePartsApi::with_root();
    let folder_a = api.add_folder("A", Some(&root));
    let existing = api.add_part("model", &folder_a, &hash(b"data"), None);
    let h = harness(api.clone()).await;
    let path = h.write("A/model.stl", b"data");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.creates, report.deletes), (0, 0));
    assert!(api.mutations().is_empty());

    let entry = h.tracking.get_by_path(&path).await.unwrap().unwrap();
    assert_eq!(entry.remote_id.as_str(), existing);
}

#[tokio::test]
async fn test_orphan_deleted_and_foreign_untouched() {
    let (api, root) = FakePartsApi::with_root();
    let ghost = api.add_part("ghost", &root, &hash(b"ghost"), None);
    let elsewhere = api.add_folder("Elsewhere", None);
    let foreign = api.add_part("keep", &elsewhere, &hash(b"keep"), None);
    let h = harness(api.clone()).await;

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.deletes, 1);
    assert_eq!(api.mutations(), vec![Call::DeletePart(ghost)]);
    assert!(api.part(&foreign).is_some());
    assert!(api.folder_named("Elsewhere", None).is_some());
}

#[tokio::test]
async fn test_legacy_folder_parts_are_adopted() {
    let (api, _root) = FakePartsApi::with_root();
    let legacy = api.add_folder("Old Sync", None);
    let folder_a = api.add_folder("A", Some(&legacy));
    let existing = api.add_part("model", &folder_a, &hash(b"legacy"), None);
    let h = harness_with(api.clone(), |s| s.legacy_folders = vec!["Old Sync".into()]).await;
    let path = h.write("A/model.3mf", b"legacy");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.creates, report.deletes), (0, 0));
    assert!(api.mutations().is_empty(), "unexpected {:?}", api.mutations());

    let entry = h.tracking.get_by_path(&path).await.unwrap().unwrap();
    assert_eq!(entry.remote_id.as_str(), existing);
}

#[tokio::test]
async fn test_local_key_collision_reported_as_conflict() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    h.write("model.3mf", b"first");
    h.write("model.stl", b"second");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.creates, report.conflicts), (1, 1));
    assert_eq!(h.engine.stats().conflicts, 1);
    assert_eq!(api.parts().len(), 1);
}

#[tokio::test]
async fn test_gcode_3mf_does_not_collide_with_plain_3mf() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    h.write("plate.3mf", b"model");
    h.write("plate.gcode.3mf", b"sliced");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!((report.creates, report.conflicts), (2, 0));

    let mut names: Vec<String> = api.parts().into_iter().map(|p| p.name).collect();
    names.sort();
    assert_eq!(names, vec!["plate".to_string(), "plate.gcode".to_string()]);
}

#[tokio::test]
async fn test_missing_root_fails_resync() {
    let (api, _root) = FakePartsApi::with_root();
    let h = harness_with(api.clone(), |s| s.root = s.root.join("does-not-exist")).await;

    let err = h.engine.full_sync().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<partsync_sync::SyncError>(),
        Some(partsync_sync::SyncError::RootUnavailable(_))
    ));
    assert!(api.calls().is_empty());
}
