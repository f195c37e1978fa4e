//! Integration tests for 429 handling and malformed responses

use partsync_api::ApiError;
use partsync_core::ports::IPartsApi;
use wiremock::{
    matchers::{method, path},
    Mock, ResponseTemplate,
};

use crate::common;

#[tokio::test]
async fn test_429_is_retried_until_success() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/parts"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "0"))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/parts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let parts = api.list_parts().await.expect("eventually succeeds");
    assert!(parts.is_empty());
    assert_eq!(api.client().gate().throttle_count(), 2);
}

#[tokio::test]
async fn test_429_gives_up_after_max_retries() {
    let (server, api) = common::setup_api_mock_with_retries(2).await;

    Mock::given(method("GET"))
        .and(path("/v1/folders"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = api.list_folders().await.unwrap_err();
    match err.downcast_ref::<ApiError>() {
        Some(ApiError::RateLimited { attempts, .. }) => assert_eq!(*attempts, 3),
        other => panic!("expected RateLimited, got {other:?}"),
    }
}

#[tokio::test]
async fn test_html_body_is_transient_invalid_response() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/parts"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = api.list_parts().await.unwrap_err();
    let api_err = err.downcast_ref::<ApiError>().expect("ApiError");
    assert!(matches!(api_err, ApiError::InvalidResponse(_)));
    assert!(api_err.is_transient());
}

#[tokio::test]
async fn test_unauthorized_is_not_transient() {
    let (server, api) = common::setup_api_mock().await;

    Mock::given(method("GET"))
        .and(path("/v1/folders"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&server)
        .await;

    let err = api.list_folders().await.unwrap_err();
    let api_err = err.downcast_ref::<ApiError>().expect("ApiError");
    assert!(matches!(api_err, ApiError::Unauthorized(_)));
    assert!(!api_err.is_transient());
}
