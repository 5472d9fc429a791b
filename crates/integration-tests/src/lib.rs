//! End-to-end test support for Merkato.
//!
//! Starts the cart service in-process on an ephemeral port, backed by the
//! in-memory store, and builds cart clients pointed at it.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p merkato-integration-tests
//!
//! # Include the PostgreSQL store tests
//! MERKATO_TEST_DATABASE_URL=postgres://localhost/merkato_test cargo test -p merkato-integration-tests
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use merkato_cart_client::{CartClient, CartClientConfig, LocalStorage};
use merkato_core::{AnonymousId, Cart, CartOwner, QuantityPolicy, UserId};
use merkato_server::db::{CartStore, MemoryCartStore, MemoryTokenVerifier};
use merkato_server::state::AppState;
use tokio::task::JoinHandle;

/// Token accepted for [`USER_ID`].
pub const USER_TOKEN: &str = "integration-user-token";

/// User authenticated by [`USER_TOKEN`].
pub const USER_ID: i32 = 1;

/// Token accepted for [`OTHER_USER_ID`].
pub const OTHER_USER_TOKEN: &str = "integration-other-user-token";

/// User authenticated by [`OTHER_USER_TOKEN`].
pub const OTHER_USER_ID: i32 = 2;

/// A cart service running on a background task.
pub struct TestServer {
    base_url: String,
    store: Arc<MemoryCartStore>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start a server with no quantity cap.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        Self::with_policy(QuantityPolicy::unlimited()).await
    }

    /// Start a server with the given quantity policy.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn with_policy(policy: QuantityPolicy) -> Self {
        let store = Arc::new(MemoryCartStore::new());
        let verifier = MemoryTokenVerifier::new()
            .with_token(USER_TOKEN, UserId::new(USER_ID))
            .with_token(OTHER_USER_TOKEN, UserId::new(OTHER_USER_ID));
        let state = AppState::new(store.clone(), Arc::new(verifier), policy);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, merkato_server::app(state)).await;
        });

        Self {
            base_url: format!("http://{addr}"),
            store,
            handle,
        }
    }

    /// Base URL of the running server.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build a cart client for this server over `storage`.
    ///
    /// # Panics
    ///
    /// Panics if the client cannot be built.
    #[must_use]
    pub fn client(&self, storage: Arc<dyn LocalStorage>) -> CartClient {
        let config = CartClientConfig::new(&self.base_url)
            .expect("Invalid test base URL")
            .with_request_timeout(Duration::from_secs(5));
        CartClient::new(&config, storage).expect("Failed to build cart client")
    }

    /// The user's cart as stored on the server.
    ///
    /// # Panics
    ///
    /// Panics if the store fails.
    pub async fn user_cart(&self, user_id: i32) -> Option<Cart> {
        self.store
            .get(&CartOwner::User(UserId::new(user_id)))
            .await
            .expect("Store read failed")
    }

    /// The anonymous cart as stored on the server.
    ///
    /// # Panics
    ///
    /// Panics if the store fails.
    pub async fn anonymous_cart(&self, anonymous_id: &AnonymousId) -> Option<Cart> {
        self.store
            .get(&CartOwner::Anonymous(anonymous_id.clone()))
            .await
            .expect("Store read failed")
    }

    /// Direct access to the backing store.
    #[must_use]
    pub fn store(&self) -> &MemoryCartStore {
        &self.store
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Poll `check` until it returns true or two seconds pass.
///
/// Fire-and-forget client calls return before the request lands; tests use
/// this to wait for the effect.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
