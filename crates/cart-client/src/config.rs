//! Cart client configuration.

use std::time::Duration;

use url::Url;

use crate::error::Result;
use crate::identity::ANONYMOUS_ID_STORAGE_KEY;

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Cart client configuration.
#[derive(Debug, Clone)]
pub struct CartClientConfig {
    /// Base URL of the cart service (e.g., `https://shop.example.com/`)
    pub base_url: Url,
    /// Timeout applied to every request
    pub request_timeout: Duration,
    /// Local storage key for the anonymous identity
    pub storage_key: String,
}

impl CartClientConfig {
    /// Build a configuration with defaults for everything but the base URL.
    ///
    /// The base URL is treated as a directory: `https://api.example.com/shop`
    /// and `https://api.example.com/shop/` both resolve `api/cart` under
    /// `/shop/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is not an absolute URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            storage_key: ANONYMOUS_ID_STORAGE_KEY.to_string(),
        })
    }

    /// Override the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Override the storage key.
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }
}
