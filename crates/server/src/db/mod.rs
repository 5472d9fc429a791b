//! Cart and access token persistence.
//!
//! Handlers talk to the [`CartStore`] and [`TokenVerifier`] traits; the
//! backend is picked at startup from `MERKATO_STORE`.
//!
//! ## Tables (`merkato` schema)
//!
//! - `cart` - One row per owner (user or anonymous shopper, never both)
//! - `cart_line` - Lines of a cart, unique per product
//! - `access_token` - SHA-256 digests of bearer tokens
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p merkato-cli -- migrate
//! ```

pub mod carts;
pub mod memory;
pub mod tokens;

use std::time::Duration;

use async_trait::async_trait;
use merkato_core::{AnonymousId, Cart, CartLines, CartOwner, MergeReport, QuantityPolicy, UserId};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

pub use carts::PgCartStore;
pub use memory::MemoryCartStore;
pub use tokens::{AccessTokenRepository, MemoryTokenVerifier, PgTokenVerifier, TokenVerifier};

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., duplicate token).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Server-side cart storage.
///
/// Implementations must make [`CartStore::merge_anonymous`] atomic: no reader
/// may observe the user cart updated while the anonymous cart still exists.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Load the cart of `owner`, if one exists.
    async fn get(&self, owner: &CartOwner) -> Result<Option<Cart>, RepositoryError>;

    /// Replace the cart of `owner` with `lines`, creating it if needed.
    async fn replace(&self, owner: &CartOwner, lines: &CartLines) -> Result<Cart, RepositoryError>;

    /// Fold the anonymous cart into the user's cart and delete it.
    ///
    /// A missing or empty anonymous cart yields a `noop` report and leaves
    /// the user cart untouched.
    async fn merge_anonymous(
        &self,
        anonymous_id: &AnonymousId,
        user_id: UserId,
        policy: &QuantityPolicy,
    ) -> Result<MergeReport, RepositoryError>;

    /// Delete the cart of `owner`. Returns whether a cart existed.
    async fn delete(&self, owner: &CartOwner) -> Result<bool, RepositoryError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
