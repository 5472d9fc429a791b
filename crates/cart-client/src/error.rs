//! Error types for the cart client.
//!
//! None of these ever reach the caller of the fire-and-forget operations;
//! they are logged and folded into `SyncOutcome` / `MergeOutcome`.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors that can occur while talking to the cart service.
#[derive(Debug, Error)]
pub enum CartClientError {
    /// Local storage is denied or missing.
    #[error("local storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),

    /// The request could not be sent or did not complete.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The bearer token was rejected by the service.
    #[error("authentication rejected")]
    AuthRejected,

    /// The service answered with a non-success status.
    #[error("server error ({status}): {message}")]
    Server {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    /// The configured base URL cannot be used.
    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(#[from] url::ParseError),
}

/// Result type alias for cart client operations.
pub type Result<T> = std::result::Result<T, CartClientError>;
