//! HTTP calls to the cart service.
//!
//! Thin `reqwest` wrapper: builds the request, attaches the bearer token when
//! there is one, and maps status codes onto [`CartClientError`].

use chrono::{DateTime, Utc};
use merkato_core::{AnonymousId, CartLines, MergeReport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use crate::config::CartClientConfig;
use crate::error::{CartClientError, Result};

/// Body of `PUT /api/cart`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Complete new cart contents.
    pub items: CartLines,
    /// Anonymous key, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anonymous_id: Option<AnonymousId>,
}

/// Body of `POST /api/cart/merge`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    /// Anonymous cart to fold into the authenticated one.
    pub anonymous_id: AnonymousId,
}

/// Cart as returned by `GET` and `PUT /api/cart`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    /// Stored lines.
    pub items: CartLines,
    /// Last write, `None` if the cart does not exist yet.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Low-level cart service client.
#[derive(Debug, Clone)]
pub struct CartApi {
    client: reqwest::Client,
    cart_url: Url,
    merge_url: Url,
}

impl CartApi {
    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the endpoint
    /// URLs cannot be derived from the base URL.
    pub fn new(config: &CartClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            client,
            cart_url: config.base_url.join("api/cart")?,
            merge_url: config.base_url.join("api/cart/merge")?,
        })
    }

    /// Replace the cart for the key in `request` (or the token's user).
    ///
    /// # Errors
    ///
    /// Returns `AuthRejected` on 401, `Server` on other non-success statuses,
    /// `Network` if the request fails to complete.
    #[instrument(
        skip(self, request, auth_token),
        fields(lines = request.items.len(), authenticated = auth_token.is_some())
    )]
    pub async fn put_cart(
        &self,
        request: &SyncRequest,
        auth_token: Option<&str>,
    ) -> Result<CartResponse> {
        let mut builder = self.client.put(self.cart_url.clone()).json(request);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        Self::execute(builder).await
    }

    /// Read the cart for an anonymous key or the token's user.
    ///
    /// # Errors
    ///
    /// Same as [`CartApi::put_cart`].
    #[instrument(skip(self, auth_token), fields(authenticated = auth_token.is_some()))]
    pub async fn get_cart(
        &self,
        anonymous_id: Option<&AnonymousId>,
        auth_token: Option<&str>,
    ) -> Result<CartResponse> {
        let mut url = self.cart_url.clone();
        if let Some(id) = anonymous_id {
            url.query_pairs_mut().append_pair("anonymousId", id.as_str());
        }
        let mut builder = self.client.get(url);
        if let Some(token) = auth_token {
            builder = builder.bearer_auth(token);
        }
        Self::execute(builder).await
    }

    /// Merge the anonymous cart into the token's user cart.
    ///
    /// # Errors
    ///
    /// Same as [`CartApi::put_cart`].
    #[instrument(skip(self, auth_token))]
    pub async fn merge(&self, anonymous_id: &AnonymousId, auth_token: &str) -> Result<MergeReport> {
        let body = MergeRequest {
            anonymous_id: anonymous_id.clone(),
        };
        let builder = self
            .client
            .post(self.merge_url.clone())
            .bearer_auth(auth_token)
            .json(&body);
        Self::execute(builder).await
    }

    async fn execute<T: DeserializeOwned>(builder: reqwest::RequestBuilder) -> Result<T> {
        let response = builder.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(CartClientError::AuthRejected);
        }

        // Read the body as text first for better error diagnostics
        let body = response.text().await?;

        if !status.is_success() {
            return Err(CartClientError::Server {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        debug!(status = %status, "Cart service responded");
        Ok(serde_json::from_str(&body)?)
    }
}
