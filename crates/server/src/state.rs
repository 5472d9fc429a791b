//! Application state shared across handlers.

use std::sync::Arc;

use merkato_core::QuantityPolicy;

use crate::config::{ServerConfig, StoreConfig};
use crate::db::{
    self, CartStore, MemoryCartStore, MemoryTokenVerifier, PgCartStore, PgTokenVerifier,
    TokenVerifier,
};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to the
/// cart store, the token verifier and the quantity policy.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    carts: Arc<dyn CartStore>,
    tokens: Arc<dyn TokenVerifier>,
    policy: QuantityPolicy,
}

impl AppState {
    /// Create state from explicit parts.
    #[must_use]
    pub fn new(
        carts: Arc<dyn CartStore>,
        tokens: Arc<dyn TokenVerifier>,
        policy: QuantityPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                carts,
                tokens,
                policy,
            }),
        }
    }

    /// Build state for the configured backend, connecting to the database
    /// when needed.
    ///
    /// # Errors
    ///
    /// Returns `sqlx::Error` if the database pool cannot be created.
    pub async fn from_config(config: &ServerConfig) -> Result<Self, sqlx::Error> {
        let policy = config.quantity_policy();

        let state = match &config.store {
            StoreConfig::Postgres { database_url } => {
                let pool = db::create_pool(database_url).await?;
                tracing::info!("Database pool created");
                Self::new(
                    Arc::new(PgCartStore::new(pool.clone())),
                    Arc::new(PgTokenVerifier::new(pool, config.token_cache_ttl)),
                    policy,
                )
            }
            StoreConfig::Memory { dev_tokens } => {
                tracing::warn!(
                    dev_tokens = dev_tokens.len(),
                    "Using in-memory cart store, carts are lost on restart"
                );
                Self::new(
                    Arc::new(MemoryCartStore::new()),
                    Arc::new(MemoryTokenVerifier::from_dev_tokens(dev_tokens)),
                    policy,
                )
            }
        };
        Ok(state)
    }

    /// Get a reference to the cart store.
    #[must_use]
    pub fn carts(&self) -> &dyn CartStore {
        self.inner.carts.as_ref()
    }

    /// Get a reference to the token verifier.
    #[must_use]
    pub fn tokens(&self) -> &dyn TokenVerifier {
        self.inner.tokens.as_ref()
    }

    /// Get the quantity policy.
    #[must_use]
    pub fn policy(&self) -> &QuantityPolicy {
        &self.inner.policy
    }
}
