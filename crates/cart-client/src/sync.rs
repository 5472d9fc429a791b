//! Cart synchronization.
//!
//! Every local cart mutation pushes the whole cart to the server with a
//! replace (PUT) call. The call is fire-and-forget: the UI never waits on it
//! and never sees its errors. The next successful sync repairs whatever a
//! failed one left behind.

use std::sync::Arc;

use merkato_core::{AnonymousId, AnonymousIdentity, CartLine, CartLines, ProductId, Quantity};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::api::{CartApi, CartResponse, SyncRequest};
use crate::error::{CartClientError, Result};
use crate::identity::IdentityResolver;

/// Reference to a product as held by the local cart.
///
/// Local carts store either the bare id or the product document they were
/// built from; both forms are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductRef {
    /// Bare product id.
    Id(String),
    /// Product document carrying its id.
    Object {
        /// Product id (`_id` or `id` on the wire).
        #[serde(alias = "_id")]
        id: String,
    },
}

impl ProductRef {
    fn raw_id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Object { id } => id,
        }
    }
}

impl From<&str> for ProductRef {
    fn from(id: &str) -> Self {
        Self::Id(id.to_owned())
    }
}

/// One item of the local cart, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItemInput {
    /// Product reference.
    pub product: ProductRef,
    /// Requested quantity. Anything that is not a positive integer becomes 1.
    #[serde(default)]
    pub quantity: Option<serde_json::Value>,
}

impl CartItemInput {
    /// Item with an explicit integer quantity.
    #[must_use]
    pub fn new(product: impl Into<ProductRef>, quantity: i64) -> Self {
        Self {
            product: product.into(),
            quantity: Some(serde_json::Value::from(quantity)),
        }
    }

    /// Item with no quantity (defaults to 1).
    #[must_use]
    pub fn without_quantity(product: impl Into<ProductRef>) -> Self {
        Self {
            product: product.into(),
            quantity: None,
        }
    }

    fn quantity(&self) -> Quantity {
        let n = match &self.quantity {
            Some(serde_json::Value::Number(n)) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.fract().abs() < f64::EPSILON)
                        .map(saturating_f64_to_i64)
                }),
            Some(serde_json::Value::String(s)) => s.trim().parse::<i64>().ok(),
            _ => None,
        };
        Quantity::or_default(n)
    }
}

#[allow(clippy::cast_possible_truncation)] // `as` saturates for out-of-range floats
fn saturating_f64_to_i64(f: f64) -> i64 {
    f as i64
}

/// Normalize local cart items into cart lines.
///
/// Items with an unusable product reference are skipped (and logged), bad
/// quantities default to 1, and repeated products are summed.
#[must_use]
pub fn normalize_items(items: &[CartItemInput]) -> CartLines {
    items
        .iter()
        .filter_map(|item| match ProductId::parse(item.product.raw_id()) {
            Ok(product_id) => Some(CartLine::new(product_id, item.quantity())),
            Err(e) => {
                warn!(product = %item.product.raw_id(), error = %e, "Skipping cart item");
                None
            }
        })
        .collect()
}

/// Why a sync was not attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No auth token and no anonymous identity: nothing to key the cart on.
    NoCartKey,
}

/// Outcome of one sync attempt.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The server now holds these lines.
    Synced(CartLines),
    /// The sync was not attempted.
    Skipped(SkipReason),
    /// The sync failed; the error has already been logged.
    Failed(CartClientError),
}

impl SyncOutcome {
    /// Returns `true` if the server accepted the cart.
    #[must_use]
    pub const fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

/// Pushes local carts to the cart service.
///
/// Cheap to clone; clones share the HTTP client and the identity resolver.
#[derive(Clone)]
pub struct CartSynchronizer {
    api: Arc<CartApi>,
    identity: Arc<IdentityResolver>,
}

impl CartSynchronizer {
    /// Create a synchronizer.
    #[must_use]
    pub const fn new(api: Arc<CartApi>, identity: Arc<IdentityResolver>) -> Self {
        Self { api, identity }
    }

    /// Sync in the background and return immediately.
    ///
    /// Outside a tokio runtime the sync is dropped with a warning.
    pub fn sync_cart(&self, items: Vec<CartItemInput>, auth_token: Option<String>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, cart sync dropped");
            return;
        };
        let this = self.clone();
        handle.spawn(async move {
            this.try_sync_cart(&items, auth_token.as_deref()).await;
        });
    }

    /// Sync and report what happened. Never returns an error.
    ///
    /// With a token the call is authenticated and carries no anonymous id.
    /// Without one, the anonymous identity is resolved (created if needed)
    /// and sent as the cart key. A rejected token falls back to the
    /// anonymous cart.
    #[instrument(skip(self, items, auth_token), fields(items = items.len()))]
    pub async fn try_sync_cart(
        &self,
        items: &[CartItemInput],
        auth_token: Option<&str>,
    ) -> SyncOutcome {
        let lines = normalize_items(items);
        let auth_token = auth_token.filter(|t| !t.trim().is_empty());

        let result = if let Some(token) = auth_token {
            let request = SyncRequest {
                items: lines,
                anonymous_id: None,
            };
            match self.api.put_cart(&request, Some(token)).await {
                Err(CartClientError::AuthRejected) => {
                    match self.identity.get_or_create_anonymous_id() {
                        AnonymousIdentity::Known(id) => {
                            info!("Auth token rejected, syncing cart anonymously");
                            self.put_anonymous(request.items, id).await
                        }
                        AnonymousIdentity::Unavailable => Err(CartClientError::AuthRejected),
                    }
                }
                other => other,
            }
        } else {
            let AnonymousIdentity::Known(id) = self.identity.get_or_create_anonymous_id() else {
                debug!("No auth token and no anonymous identity, skipping cart sync");
                return SyncOutcome::Skipped(SkipReason::NoCartKey);
            };
            self.put_anonymous(lines, id).await
        };

        match result {
            Ok(response) => {
                debug!(lines = response.items.len(), "Cart synced");
                SyncOutcome::Synced(response.items)
            }
            Err(e) => {
                warn!(error = %e, "Cart sync failed");
                SyncOutcome::Failed(e)
            }
        }
    }

    async fn put_anonymous(
        &self,
        items: CartLines,
        anonymous_id: AnonymousId,
    ) -> Result<CartResponse> {
        let request = SyncRequest {
            items,
            anonymous_id: Some(anonymous_id),
        };
        self.api.put_cart(&request, None).await
    }

    /// Read the server cart for the current key.
    ///
    /// With a token the user's cart is returned; otherwise the anonymous one.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailable` when there is neither a token nor an
    /// anonymous identity, or any error from the cart service.
    pub async fn fetch_cart(&self, auth_token: Option<&str>) -> Result<CartResponse> {
        if let Some(token) = auth_token.filter(|t| !t.trim().is_empty()) {
            return self.api.get_cart(None, Some(token)).await;
        }
        match self.identity.get_or_create_anonymous_id() {
            AnonymousIdentity::Known(id) => self.api.get_cart(Some(&id), None).await,
            AnonymousIdentity::Unavailable => Err(CartClientError::StorageUnavailable(
                crate::storage::StorageError::Denied("no anonymous identity".to_string()),
            )),
        }
    }
}

impl std::fmt::Debug for CartSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CartSynchronizer")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::config::CartClientConfig;
    use crate::identity::ANONYMOUS_ID_STORAGE_KEY;
    use crate::storage::{LocalStorage, MemoryStorage, UnavailableStorage};

    fn synchronizer(base_url: &str, identity: IdentityResolver) -> CartSynchronizer {
        let config = CartClientConfig::new(base_url).unwrap();
        CartSynchronizer::new(Arc::new(CartApi::new(&config).unwrap()), Arc::new(identity))
    }

    fn memory_identity() -> IdentityResolver {
        IdentityResolver::new(Arc::new(MemoryStorage::new()))
    }

    fn unavailable_identity() -> IdentityResolver {
        IdentityResolver::new(Arc::new(UnavailableStorage))
    }

    fn echo_cart() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"product": "p1", "quantity": 1}],
            "updatedAt": "2026-01-01T00:00:00Z"
        }))
    }

    #[test]
    fn test_normalize_defaults_and_folds() {
        let items: Vec<CartItemInput> = serde_json::from_value(serde_json::json!([
            {"product": "p1", "quantity": 2},
            {"product": {"_id": "p2"}},
            {"product": {"id": "p3"}, "quantity": "4"},
            {"product": "p4", "quantity": 0},
            {"product": "p5", "quantity": -3},
            {"product": "p6", "quantity": 2.5},
            {"product": "p7", "quantity": 3.0},
            {"product": "p8", "quantity": null},
            {"product": "p1", "quantity": 1}
        ]))
        .unwrap();

        let lines = normalize_items(&items);
        let got: Vec<(String, u32)> = lines
            .iter()
            .map(|l| (l.product_id.into_inner(), l.quantity.get()))
            .collect();
        assert_eq!(
            got,
            vec![
                ("p1".to_string(), 3),
                ("p2".to_string(), 1),
                ("p3".to_string(), 4),
                ("p4".to_string(), 1),
                ("p5".to_string(), 1),
                ("p6".to_string(), 1),
                ("p7".to_string(), 3),
                ("p8".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_normalize_skips_bad_product() {
        let items = vec![
            CartItemInput::new("", 1),
            CartItemInput::new("has space", 1),
            CartItemInput::without_quantity("ok"),
        ];
        let lines = normalize_items(&items);
        assert_eq!(lines.len(), 1);
        assert_eq!(
            lines.get(&ProductId::parse("ok").unwrap()),
            Some(Quantity::ONE)
        );
    }

    #[tokio::test]
    async fn test_sync_without_token_creates_identity() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/cart"))
            .respond_with(echo_cart())
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(MemoryStorage::new());
        let sync = synchronizer(&server.uri(), IdentityResolver::new(storage));

        let outcome = sync.try_sync_cart(&[CartItemInput::new("p1", 1)], None).await;
        assert!(outcome.is_synced());

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body["anonymousId"].as_str().is_some_and(|s| !s.is_empty()));
        assert!(!requests[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_authenticated_sync_sends_no_anonymous_id() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/cart"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(echo_cart())
            .expect(1)
            .mount(&server)
            .await;

        let storage: Arc<dyn LocalStorage> = Arc::new(MemoryStorage::new());
        let sync = synchronizer(&server.uri(), IdentityResolver::new(storage.clone()));

        let outcome = sync
            .try_sync_cart(&[CartItemInput::new("p1", 1)], Some("tok"))
            .await;
        assert!(outcome.is_synced());

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert!(body.get("anonymousId").is_none());
        assert_eq!(storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap(), None);

        // Reading the user's cart does not create an identity either
        Mock::given(method("GET"))
            .and(path("/api/cart"))
            .respond_with(echo_cart())
            .mount(&server)
            .await;
        sync.fetch_cart(Some("tok")).await.unwrap();
        assert_eq!(storage.get_item(ANONYMOUS_ID_STORAGE_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sync_skipped_without_any_key() {
        let server = MockServer::start().await;
        let sync = synchronizer(&server.uri(), unavailable_identity());

        let outcome = sync.try_sync_cart(&[CartItemInput::new("p1", 1)], None).await;
        assert!(matches!(outcome, SyncOutcome::Skipped(SkipReason::NoCartKey)));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_with_token_and_unavailable_storage_still_syncs() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("authorization", "Bearer tok"))
            .respond_with(echo_cart())
            .expect(1)
            .mount(&server)
            .await;

        let sync = synchronizer(&server.uri(), unavailable_identity());
        let outcome = sync
            .try_sync_cart(&[CartItemInput::new("p1", 1)], Some("tok"))
            .await;
        assert!(outcome.is_synced());
    }

    #[tokio::test]
    async fn test_rejected_token_falls_back_to_anonymous() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(header("authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .respond_with(echo_cart())
            .expect(1)
            .mount(&server)
            .await;

        let sync = synchronizer(&server.uri(), memory_identity());
        let outcome = sync
            .try_sync_cart(&[CartItemInput::new("p1", 1)], Some("expired"))
            .await;
        assert!(outcome.is_synced());

        let requests = server.received_requests().await.unwrap();
        let retry: serde_json::Value = serde_json::from_slice(&requests[1].body).unwrap();
        assert!(retry["anonymousId"].is_string());
        assert!(!requests[1].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_rejected_token_without_identity_fails() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let sync = synchronizer(&server.uri(), unavailable_identity());
        let outcome = sync
            .try_sync_cart(&[CartItemInput::new("p1", 1)], Some("expired"))
            .await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed(CartClientError::AuthRejected)
        ));
    }

    #[tokio::test]
    async fn test_network_failure_is_absorbed() {
        // Nothing listens on port 9 (discard) in the test environment
        let sync = synchronizer("http://127.0.0.1:9", memory_identity());
        let outcome = sync.try_sync_cart(&[CartItemInput::new("p1", 1)], None).await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed(CartClientError::Network(_))
        ));
    }

    #[tokio::test]
    async fn test_server_error_is_absorbed() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let sync = synchronizer(&server.uri(), memory_identity());
        let outcome = sync.try_sync_cart(&[], None).await;
        assert!(matches!(
            outcome,
            SyncOutcome::Failed(CartClientError::Server { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn test_fire_and_forget_reaches_server() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(echo_cart())
            .mount(&server)
            .await;

        let sync = synchronizer(&server.uri(), memory_identity());
        sync.sync_cart(vec![CartItemInput::new("p1", 1)], None);

        let mut received = 0;
        for _ in 0..50 {
            received = server.received_requests().await.unwrap().len();
            if received > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(received, 1);
    }

    #[test]
    fn test_fire_and_forget_without_runtime_does_not_panic() {
        let sync = synchronizer("http://127.0.0.1:9", memory_identity());
        sync.sync_cart(vec![CartItemInput::new("p1", 1)], None);
    }
}
