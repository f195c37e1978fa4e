//! Integration tests for part operations and signed uploads

use partsync_core::domain::newtypes::{FileHash, RemoteId};
use partsync_core::domain::PartType;
use partsync_core::ports::{IPartsApi, NewPart, SignedUpload};
use wiremock::{
    matchers::{body_bytes, body_json, method, path},
    Mock, ResponseTemplate,
};

use crate::common;

fn id(s: &str) -> RemoteId {
    RemoteId::new(s.to_string()).unwrap()
}

#[tokio::test]
async fn test_list_parts_maps_first_hash() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/parts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {
                "id": "p1", "name": "cube", "folderId": "fA",
                "fileHashes": [common::sha('a'), common::sha('b')],
                "updatedAt": "2024-03-01T12:00:00Z", "type": "stl"
            },
            {"id": "p2", "name": "orphan", "folderId": null, "fileHashes": []}
        ])))
        .mount(&server)
        .await;

    let parts = api.list_parts().await.expect("list parts");
    assert_eq!(parts.len(), 2);
    assert_eq!(parts[0].content_hash().unwrap().as_str(), common::sha('a'));
    assert!(parts[0].updated_at.is_some());
    assert!(parts[1].folder_id.is_none());
    assert!(parts[1].content_hash().is_none());
}

#[tokio::test]
async fn test_create_part_sends_full_payload() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("POST"))
        .and(path("/v1/parts"))
        .and(body_json(serde_json::json!({
            "name": "plate.gcode",
            "type": "gcode3mf",
            "description": "Auto-uploaded from folder watch",
            "fileUris": ["uploads/abc/plate.gcode.3mf"],
            "fileHashes": [common::sha('c')],
            "parameters": [],
            "printTags": {},
            "overriddenProcessProfileId": null,
            "folderId": "fA"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
            "id": "part-new", "name": "plate.gcode"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let new_part = NewPart {
        name: "plate.gcode".into(),
        part_type: PartType::Gcode3mf,
        file_uri: "uploads/abc/plate.gcode.3mf".into(),
        content_hash: FileHash::new(common::sha('c')).unwrap(),
        folder_id: id("fA"),
    };
    let created = api.create_part(&new_part).await.expect("create part");
    assert_eq!(created.as_str(), "part-new");
}

#[tokio::test]
async fn test_update_content_patches_only_file_reference() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/parts/p1"))
        .and(body_json(serde_json::json!({
            "fileUris": ["uploads/new/cube.stl"],
            "fileHashes": [common::sha('d')]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": "p1"})))
        .expect(1)
        .mount(&server)
        .await;

    api.update_part_content(
        &id("p1"),
        "uploads/new/cube.stl",
        &FileHash::new(common::sha('d')).unwrap(),
    )
    .await
    .expect("patch content");
}

#[tokio::test]
async fn test_move_part_patches_only_folder() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/parts/p1"))
        .and(body_json(serde_json::json!({"folderId": "fB"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    api.move_part(&id("p1"), &id("fB")).await.expect("move");
}

#[tokio::test]
async fn test_delete_part_treats_404_as_already_gone() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/parts/present"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/parts/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("not found"))
        .mount(&server)
        .await;

    assert!(api.delete_part(&id("present")).await.unwrap());
    assert!(!api.delete_part(&id("missing")).await.unwrap());
}

#[tokio::test]
async fn test_delete_part_propagates_server_error() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("DELETE"))
        .and(path("/v1/parts/p1"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = api.delete_part(&id("p1")).await.unwrap_err();
    let api_err = err.downcast_ref::<partsync_api::ApiError>().unwrap();
    assert!(api_err.is_transient());
}

#[tokio::test]
async fn test_signed_upload_flow() {
    let (server, api) = common::setup_api_mock().await;

    let upload_url = format!("{}/storage/bucket/obj-1?sig=xyz", server.uri());
    Mock::given(method("POST"))
        .and(path("/v1/storage/signed-upload-urls"))
        .and(body_json(serde_json::json!({"filenames": ["cube.stl"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "signedUrls": [{"uploadUrl": upload_url, "path": "uploads/obj-1/cube.stl"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/storage/bucket/obj-1"))
        .and(body_bytes(b"solid cube".to_vec()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let signed = api.signed_upload_url("cube.stl").await.expect("signed url");
    assert_eq!(signed.path, "uploads/obj-1/cube.stl");
    api.upload_bytes(&signed, b"solid cube".to_vec())
        .await
        .expect("upload bytes");

    let requests = server.received_requests().await.unwrap();
    let put = requests
        .iter()
        .find(|r| r.method == wiremock::http::Method::PUT)
        .expect("PUT request");
    assert!(put.headers.get("authorization").is_none());
    assert!(put.headers.get("x-printago-storeid").is_none());
}

#[tokio::test]
async fn test_signed_upload_empty_reply_is_invalid_response() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("POST"))
        .and(path("/v1/storage/signed-upload-urls"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"signedUrls": []})),
        )
        .mount(&server)
        .await;

    assert!(api.signed_upload_url("x.stl").await.is_err());

    let failing = SignedUpload {
        upload_url: format!("{}/nowhere", server.uri()),
        path: "p".into(),
    };
    assert!(api.upload_bytes(&failing, vec![1, 2, 3]).await.is_err());
}
