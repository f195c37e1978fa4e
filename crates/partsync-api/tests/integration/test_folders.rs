//! Integration tests for folder operations

use partsync_core::domain::newtypes::RemoteId;
use partsync_core::ports::IPartsApi;
use wiremock::{
    matchers::{body_json, header, method, path, query_param},
    Mock, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_list_folders_sends_auth_and_agent_headers() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/folders"))
        .and(query_param("limit", "10000"))
        .and(header("authorization", "ApiKey test-api-key"))
        .and(header("x-printago-storeid", "store-test-001"))
        .and(header("user-agent", "PrintagoFolderWatch/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": "root", "name": "Local Folder Sync", "parentId": null, "type": "part"},
            {"id": "fA", "name": "A", "parentId": "root", "type": "part"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let folders = api.list_folders().await.expect("list folders");
    assert_eq!(folders.len(), 2);
    assert!(folders[0].parent_id.is_none());
    assert_eq!(folders[1].parent_id.as_ref().unwrap().as_str(), "root");
}

#[tokio::test]
async fn test_list_folders_accepts_data_wrapper() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/folders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "data": [{"id": "f1", "name": "X", "parentId": null}]
        })))
        .mount(&server)
        .await;

    let folders = api.list_folders().await.expect("list folders");
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].name, "X");
}

#[tokio::test]
async fn test_create_folder_posts_part_type_and_parent() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("POST"))
        .and(path("/v1/folders"))
        .and(body_json(serde_json::json!({
            "name": "Brackets",
            "type": "part",
            "parentId": "root"
        })))
        .respond_with(
            ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "new-folder"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let parent = RemoteId::new("root".into()).unwrap();
    let id = api
        .create_folder("Brackets", Some(&parent))
        .await
        .expect("create folder");
    assert_eq!(id.as_str(), "new-folder");
}

#[tokio::test]
async fn test_create_top_level_folder_sends_null_parent() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("POST"))
        .and(path("/v1/folders"))
        .and(body_json(serde_json::json!({
            "name": "Local Folder Sync",
            "type": "part",
            "parentId": null
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "root"})))
        .expect(1)
        .mount(&server)
        .await;

    let id = api
        .create_folder("Local Folder Sync", None)
        .await
        .expect("create root");
    assert_eq!(id.as_str(), "root");
}

#[tokio::test]
async fn test_delete_folders_uses_bulk_endpoint() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/folders/delete"))
        .and(body_json(serde_json::json!({
            "folderIds": ["f2", "f1"],
            "type": "part"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let ids = vec![
        RemoteId::new("f2".into()).unwrap(),
        RemoteId::new("f1".into()).unwrap(),
    ];
    api.delete_folders(&ids).await.expect("bulk delete");
}

#[tokio::test]
async fn test_delete_folders_empty_is_noop() {
    let (server, api) = common::setup_api_mock().await;
    api.delete_folders(&[]).await.expect("noop");
    assert!(server.received_requests().await.unwrap().is_empty());
}
