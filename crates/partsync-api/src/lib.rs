//! partsync API - Printago parts/folders HTTP client
//!
//! Provides an async client for:
//! - Folder listing, creation and bulk deletion
//! - Part listing, creation, content and folder PATCHes, deletion
//! - Signed upload URLs and the raw byte transfer
//!
//! ## Modules
//!
//! - [`rate_limit`] - The request gate every API call passes through
//! - [`client`] - Authenticated HTTP client with 429 backoff
//! - [`provider`] - [`IPartsApi`](partsync_core::ports::IPartsApi) implementation

pub mod client;
pub mod provider;
pub mod rate_limit;

use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur when communicating with the parts API
#[derive(Debug, Error)]
pub enum ApiError {
    /// API key rejected
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Key is valid but lacks access to the store
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Request was rejected as malformed (other 4xx)
    #[error("Bad request ({status}): {message}")]
    BadRequest {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        message: String,
    },

    /// Rate limit still in force after every retry
    #[error("Too many requests: gave up after {attempts} attempts, last retry-after {retry_after:?}")]
    RateLimited {
        /// Number of attempts made
        attempts: u32,
        /// The last delay the server asked for
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error ({status}): {message}")]
    ServerError {
        /// HTTP status code
        status: u16,
        /// Response body, truncated
        message: String,
    },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Client could not be constructed
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Longest response excerpt kept in error messages
const MAX_ERROR_BODY: usize = 300;

impl ApiError {
    /// Map a non-success status and its body to an error
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message: String = body.chars().take(MAX_ERROR_BODY).collect();
        match status {
            StatusCode::UNAUTHORIZED => Self::Unauthorized(message),
            StatusCode::FORBIDDEN => Self::Forbidden(message),
            StatusCode::NOT_FOUND => Self::NotFound(message),
            s if s.is_server_error() => Self::ServerError {
                status: s.as_u16(),
                message,
            },
            s => Self::BadRequest {
                status: s.as_u16(),
                message,
            },
        }
    }

    /// True for failures worth retrying on a later attempt
    ///
    /// Rate limiting, 5xx, network trouble and unparseable bodies are
    /// transient. Auth failures, 404 and other 4xx are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::InvalidResponse(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
