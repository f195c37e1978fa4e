//! Folder resolution and empty-folder cleanup

use crate::common::{harness, harness_with, Call, FakePartsApi, ROOT_NAME};

fn created_folders(api: &FakePartsApi) -> Vec<String> {
    api.calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::CreateFolder { name, .. } => Some(name),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_sync_root_created_when_missing() {
    let api = FakePartsApi::new();
    let h = harness(api.clone()).await;
    h.write("model.stl", b"at the root");

    h.engine.run_once().await.unwrap();

    let root = api.folder_named(ROOT_NAME, None).expect("sync root created");
    let parts = api.parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].folder_id, Some(root.id));
    assert_eq!(created_folders(&api), vec![ROOT_NAME.to_string()]);
}

#[tokio::test]
async fn test_each_segment_created_once() {
    let (api, root) = FakePartsApi::with_root();
    let h = harness(api.clone()).await;
    h.write("X/Y/a.stl", b"a");
    h.write("X/Y/b.stl", b"b");
    h.write("X/c.stl", b"c");

    h.engine.run_once().await.unwrap();

    assert_eq!(created_folders(&api), vec!["X".to_string(), "Y".to_string()]);
    let x = api.folder_named("X", Some(&root)).unwrap();
    assert!(api.folder_named("Y", Some(x.id.as_str())).is_some());
    assert_eq!(h.engine.stats().folders_created, 2);
}

#[tokio::test]
async fn test_existing_folders_reused() {
    let (api, root) = FakePartsApi::with_root();
    api.add_folder("X", Some(&root));
    let h = harness(api.clone()).await;
    h.write("X/a.stl", b"a");

    h.engine.run_once().await.unwrap();
    assert!(created_folders(&api).is_empty());
}

#[tokio::test]
async fn test_legacy_folder_reused_for_new_files() {
    let (api, _root) = FakePartsApi::with_root();
    let legacy = api.add_folder("Old Sync", None);
    let old_x = api.add_folder("X", Some(&legacy));
    let h = harness_with(api.clone(), |s| s.legacy_folders = vec!["Old Sync".into()]).await;
    h.write("X/new.stl", b"new");

    h.engine.run_once().await.unwrap();

    assert!(created_folders(&api).is_empty());
    let parts = api.parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].folder_id.as_ref().map(|f| f.as_str()), Some(old_x.as_str()));
}

#[tokio::test]
async fn test_empty_legacy_top_folder_survives_cleanup() {
    let (api, root) = FakePartsApi::with_root();
    let legacy = api.add_folder("Old Sync", None);
    let h = harness_with(api.clone(), |s| s.legacy_folders = vec!["Old Sync".into()]).await;
    h.write("model.stl", b"at the root");

    let report = h.engine.run_once().await.unwrap();

    assert_eq!(report.folders_deleted, 0);
    assert!(!api
        .mutations()
        .iter()
        .any(|c| matches!(c, Call::DeleteFolders(_))));
    assert_eq!(
        api.folder_named("Old Sync", None).map(|f| f.id.as_str().to_string()),
        Some(legacy)
    );
    let parts = api.parts();
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].folder_id.as_ref().map(|f| f.as_str()), Some(root.as_str()));
}

#[tokio::test]
async fn test_cleanup_removes_empty_unmirrored_folders() {
    let (api, root) = FakePartsApi::with_root();
    let stale = api.add_folder("Stale", Some(&root));
    api.add_folder("Nested", Some(&stale));
    api.add_folder("Keep", Some(&root));
    let h = harness(api.clone()).await;
    std::fs::create_dir_all(h.root().join("Keep")).unwrap();

    let planned = h.engine.cleanup_folders(true).await.unwrap();
    let mut names: Vec<String> = planned.iter().map(|f| f.name.clone()).collect();
    names.sort();
    assert_eq!(names, vec!["Nested".to_string(), "Stale".to_string()]);
    assert!(api.mutations().is_empty());

    let deleted = h.engine.cleanup_folders(false).await.unwrap();
    assert_eq!(deleted.len(), 2);
    // Deepest first
    assert_eq!(deleted[0].name, "Nested");

    let remaining: Vec<String> = api.folders().into_iter().map(|f| f.name).collect();
    assert_eq!(remaining.len(), 2);
    assert!(remaining.contains(&ROOT_NAME.to_string()));
    assert!(remaining.contains(&"Keep".to_string()));
    assert_eq!(
        api.mutations()
            .iter()
            .filter(|c| matches!(c, Call::DeleteFolders(_)))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_full_sync_cleans_folders_to_fixed_point() {
    let (api, root) = FakePartsApi::with_root();
    let a = api.add_folder("A", Some(&root));
    let b = api.add_folder("B", Some(&a));
    api.add_folder("C", Some(&b));
    let h = harness(api.clone()).await;
    h.write("model.stl", b"m");

    let report = h.engine.run_once().await.unwrap();
    assert_eq!(report.folders_deleted, 3);
    assert_eq!(report.passes, 2);
    assert_eq!(report.creates, 1);
    assert_eq!(h.engine.stats().folders_deleted, 3);
    assert_eq!(api.folders().len(), 1);
}
