//! Merkato cart client.
//!
//! Keeps a shopper's server-side cart in step with the cart held by the
//! client, with or without an account:
//!
//! - [`identity`] - stable anonymous identity persisted in local storage
//! - [`sync`] - replace-style cart sync on every cart change
//! - [`merge`] - fold the anonymous cart into the account cart at login
//!
//! Cart operations are best-effort. The public `sync_cart` and
//! `merge_cart_on_login` calls spawn onto the current tokio runtime and never
//! report errors; the `try_*` variants return the outcome for callers (and
//! tests) that want to look.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use merkato_cart_client::{CartClient, CartClientConfig, CartItemInput, FileStorage};
//!
//! # async fn demo() -> Result<(), merkato_cart_client::CartClientError> {
//! let config = CartClientConfig::new("https://shop.example.com")?;
//! let storage = Arc::new(FileStorage::new("/tmp/merkato-storage.json"));
//! let client = CartClient::new(&config, storage)?;
//!
//! // Anonymous browsing
//! client.sync_cart(vec![CartItemInput::new("sku-1", 2)], None);
//!
//! // After login
//! client.on_auth_state_changed(Some("bearer-token"));
//! # Ok(())
//! # }
//! ```

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod api;
pub mod config;
pub mod error;
pub mod identity;
pub mod merge;
pub mod storage;
pub mod sync;

use std::sync::Arc;

use merkato_core::AnonymousIdentity;

pub use api::{CartApi, CartResponse};
pub use config::CartClientConfig;
pub use error::{CartClientError, Result};
pub use identity::{ANONYMOUS_ID_STORAGE_KEY, IdGenerator, IdentityResolver, TimeRandomGenerator};
pub use merge::{MergeCoordinator, MergeOutcome, MergeSkipReason};
pub use storage::{FileStorage, LocalStorage, MemoryStorage, StorageError, UnavailableStorage};
pub use sync::{CartItemInput, CartSynchronizer, ProductRef, SkipReason, SyncOutcome};

/// Cart client for one storage scope.
///
/// Bundles the identity resolver, the synchronizer and the merge coordinator
/// over a shared HTTP client. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CartClient {
    identity: Arc<IdentityResolver>,
    synchronizer: CartSynchronizer,
    merger: MergeCoordinator,
}

impl CartClient {
    /// Create a client with the default identity generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &CartClientConfig, storage: Arc<dyn LocalStorage>) -> Result<Self> {
        Self::with_generator(config, storage, Arc::new(TimeRandomGenerator))
    }

    /// Create a client with a custom identity generator.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_generator(
        config: &CartClientConfig,
        storage: Arc<dyn LocalStorage>,
        generator: Arc<dyn IdGenerator>,
    ) -> Result<Self> {
        let api = Arc::new(CartApi::new(config)?);
        let identity = Arc::new(
            IdentityResolver::with_generator(storage, generator).with_key(&config.storage_key),
        );

        Ok(Self {
            synchronizer: CartSynchronizer::new(api.clone(), identity.clone()),
            merger: MergeCoordinator::new(api, identity.clone()),
            identity,
        })
    }

    /// Resolve (creating if needed) the anonymous identity.
    pub fn get_or_create_anonymous_id(&self) -> AnonymousIdentity {
        self.identity.get_or_create_anonymous_id()
    }

    /// Drop the anonymous identity. The next cart operation creates a new one.
    pub fn forget_anonymous_id(&self) {
        self.identity.forget();
    }

    /// Push the cart in the background. See [`CartSynchronizer::sync_cart`].
    pub fn sync_cart(&self, items: Vec<CartItemInput>, auth_token: Option<String>) {
        self.synchronizer.sync_cart(items, auth_token);
    }

    /// Push the cart and report the outcome.
    pub async fn try_sync_cart(&self, items: &[CartItemInput], auth_token: Option<&str>) -> SyncOutcome {
        self.synchronizer.try_sync_cart(items, auth_token).await
    }

    /// Read the server cart for the current key.
    ///
    /// # Errors
    ///
    /// See [`CartSynchronizer::fetch_cart`].
    pub async fn fetch_cart(&self, auth_token: Option<&str>) -> Result<CartResponse> {
        self.synchronizer.fetch_cart(auth_token).await
    }

    /// Merge the anonymous cart in the background.
    pub fn merge_cart_on_login(&self, auth_token: String) {
        self.merger.merge_cart_on_login(auth_token);
    }

    /// Merge the anonymous cart and report the outcome.
    pub async fn try_merge(&self, auth_token: &str) -> MergeOutcome {
        self.merger.try_merge(auth_token).await
    }

    /// Report auth state; merges once per login transition.
    pub fn on_auth_state_changed(&self, auth_token: Option<&str>) -> bool {
        self.merger.on_auth_state_changed(auth_token)
    }
}
