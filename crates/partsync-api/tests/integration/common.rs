//! Shared test helpers for parts API integration tests
//!
//! Each helper returns a provider pointing at a fresh wiremock server. The
//! gate runs with no minimum interval and millisecond backoffs so tests
//! stay fast.

use std::sync::Arc;
use std::time::Duration;

use wiremock::MockServer;

use partsync_api::client::ApiClient;
use partsync_api::provider::PartsApiProvider;
use partsync_api::rate_limit::{GateConfig, RequestGate};

pub const API_KEY: &str = "test-api-key";
pub const STORE_ID: &str = "store-test-001";

pub fn fast_gate(max_retries: u32) -> Arc<RequestGate> {
    Arc::new(RequestGate::new(GateConfig {
        min_interval: Duration::ZERO,
        max_retries,
        base_backoff: Duration::from_millis(5),
        max_backoff: Duration::from_millis(20),
    }))
}

/// Starts a mock server and returns a provider aimed at it.
pub async fn setup_api_mock() -> (MockServer, PartsApiProvider) {
    setup_api_mock_with_retries(3).await
}

pub async fn setup_api_mock_with_retries(max_retries: u32) -> (MockServer, PartsApiProvider) {
    let server = MockServer::start().await;
    let client = ApiClient::with_base_url(API_KEY, STORE_ID, server.uri(), fast_gate(max_retries))
        .expect("client builds");
    (server, PartsApiProvider::new(client, 10_000))
}

pub fn sha(c: char) -> String {
    c.to_string().repeat(64)
}
