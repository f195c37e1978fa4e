//! Printago parts API client
//!
//! Provides a typed HTTP client for the parts API. Handles the API-key and
//! store headers, routes every call through the shared [`RequestGate`], and
//! retries 429 responses with bounded backoff.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use partsync_api::{client::ApiClient, rate_limit::RequestGate};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let gate = Arc::new(RequestGate::with_defaults());
//! let client = ApiClient::with_base_url("key", "store", "http://localhost:8080", gate)?;
//! let folders: serde_json::Value = client.get_json("/v1/folders?limit=10").await?;
//! # Ok(())
//! # }
//! ```

use std::{sync::Arc, time::Duration};

use partsync_core::config::ApiConfig;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::rate_limit::{parse_retry_after, RequestGate};
use crate::ApiError;

/// Header carrying the store identifier
const STORE_HEADER: &str = "x-printago-storeid";

/// Fallback when a 429 arrives without a usable Retry-After
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Timeout for the raw transfer to a signed upload URL
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// ApiClient
// ============================================================================

/// HTTP client for the parts API
///
/// Cloning is cheap; clones share the connection pool and the gate.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    /// Separate client for signed upload URLs, which must not see API headers
    upload_client: Client,
    base_url: String,
    api_key: String,
    store_id: String,
    gate: Arc<RequestGate>,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("store_id", &self.store_id)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Creates a client from the `api` configuration section
    ///
    /// # Errors
    /// Returns [`ApiError::Configuration`] if the HTTP client cannot be built
    pub fn new(config: &ApiConfig, gate: Arc<RequestGate>) -> Result<Self, ApiError> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::Configuration(e.to_string()))?;
        let upload_client = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            upload_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            store_id: config.store_id.clone(),
            gate,
        })
    }

    /// Creates a client with the default `api` settings (user agent,
    /// timeout) and a custom base URL, useful for testing
    ///
    /// # Errors
    /// Returns [`ApiError::Configuration`] if the HTTP client cannot be built
    pub fn with_base_url(
        api_key: impl Into<String>,
        store_id: impl Into<String>,
        base_url: impl Into<String>,
        gate: Arc<RequestGate>,
    ) -> Result<Self, ApiError> {
        let config = ApiConfig {
            base_url: base_url.into(),
            api_key: api_key.into(),
            store_id: store_id.into(),
            ..ApiConfig::default()
        };
        Self::new(&config, gate)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }

    /// Creates an authenticated request builder for the given method and path
    ///
    /// Prepends the base URL and adds the API key and store headers. Does
    /// not pass through the gate; use [`ApiClient::execute_with_retry`] to
    /// actually send.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .header(header::AUTHORIZATION, format!("ApiKey {}", self.api_key))
            .header(STORE_HEADER, &self.store_id)
    }

    // ========================================================================
    // execute_with_retry
    // ========================================================================

    /// Sends a request through the gate, retrying on 429
    ///
    /// The gate permit is held across retries. A non-429 response is
    /// returned as-is (including error statuses) for the caller to map.
    ///
    /// # Errors
    /// [`ApiError::RateLimited`] once retries are exhausted, or
    /// [`ApiError::NetworkError`] if the request cannot be sent
    pub async fn execute_with_retry(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let mut permit = self.gate.acquire().await;
        let max_retries = permit.max_retries();

        for attempt in 0..=max_retries {
            let mut builder = self.request(method.clone(), path);
            if let Some(json) = body {
                builder = builder.json(json);
            }
            let response = builder.send().await?;

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                if attempt > 0 {
                    info!(path, attempt, "Request succeeded after retry");
                }
                return Ok(response);
            }

            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER));

            if attempt >= max_retries {
                warn!(path, attempts = attempt + 1, "429 retry limit exhausted");
                return Err(ApiError::RateLimited {
                    attempts: attempt + 1,
                    retry_after: retry_after.unwrap_or(DEFAULT_RETRY_AFTER),
                });
            }

            let delay = self.gate.config().backoff_delay(attempt, retry_after);
            info!(
                path,
                attempt,
                retry_after_ms = delay.as_millis() as u64,
                "Received 429, backing off"
            );
            permit.back_off(attempt, retry_after).await;
        }

        Err(ApiError::RateLimited {
            attempts: max_retries + 1,
            retry_after: DEFAULT_RETRY_AFTER,
        })
    }

    /// Sends a request and maps any non-2xx status to an [`ApiError`]
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Response, ApiError> {
        let response = self.execute_with_retry(method.clone(), path, body).await?;
        let status = response.status();
        if status.is_success() {
            debug!(%method, path, status = status.as_u16(), "API call succeeded");
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        debug!(%method, path, status = status.as_u16(), "API call failed");
        Err(ApiError::from_status(status, &text))
    }

    /// `GET` and decode a JSON body
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self.send(Method::GET, path, None).await?;
        decode_json(response, path).await
    }

    /// Send a JSON body and decode the JSON reply
    pub async fn send_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<T, ApiError> {
        let response = self.send(method, path, Some(body)).await?;
        decode_json(response, path).await
    }

    // ========================================================================
    // Signed uploads
    // ========================================================================

    /// `PUT` raw bytes to a signed storage URL
    ///
    /// Bypasses the gate and sends no API credentials; the URL's own
    /// signature authorizes the write.
    pub async fn put_signed(&self, upload_url: &str, data: Vec<u8>) -> Result<(), ApiError> {
        let size = data.len();
        let response = self.upload_client.put(upload_url).body(data).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, &text));
        }
        debug!(bytes = size, "Uploaded bytes to signed URL");
        Ok(())
    }
}

/// Decode a JSON body, treating HTML or garbage as a transient failure
async fn decode_json<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, ApiError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        let excerpt: String = String::from_utf8_lossy(&bytes).chars().take(120).collect();
        ApiError::InvalidResponse(format!("{path}: {e} (body starts: {excerpt:?})"))
    })
}
