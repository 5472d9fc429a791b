//! Bearer token verification.
//!
//! The cart service does not log users in; it trusts tokens issued by the
//! authentication subsystem. Tokens are stored as SHA-256 digests so a leaked
//! table does not leak usable credentials.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use merkato_core::UserId;
use moka::future::Cache;
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::{debug, instrument};

use super::RepositoryError;
use crate::config::DevToken;

/// Number of random bytes in a generated token.
const TOKEN_BYTES: usize = 32;

/// Maximum number of verified tokens kept in the cache.
const TOKEN_CACHE_CAPACITY: u64 = 10_000;

/// SHA-256 digest of a bearer token.
#[must_use]
pub fn hash_token(token: &str) -> Vec<u8> {
    Sha256::digest(token.as_bytes()).to_vec()
}

/// Generate a random URL-safe bearer token.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Resolves a bearer token to the user it authenticates.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Returns the token's user, or `None` if the token is unknown or expired.
    async fn verify(&self, token: &str) -> Result<Option<UserId>, RepositoryError>;
}

/// Verifies tokens against `merkato.access_token`.
///
/// Successful lookups are cached for the configured TTL, so a revoked token
/// may keep working for up to that long.
#[derive(Clone)]
pub struct PgTokenVerifier {
    pool: PgPool,
    cache: Cache<Vec<u8>, UserId>,
}

impl PgTokenVerifier {
    /// Create a verifier caching hits for `ttl`.
    #[must_use]
    pub fn new(pool: PgPool, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(TOKEN_CACHE_CAPACITY)
            .time_to_live(ttl)
            .build();
        Self { pool, cache }
    }
}

impl std::fmt::Debug for PgTokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgTokenVerifier")
            .field("cached", &self.cache.entry_count())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenVerifier for PgTokenVerifier {
    #[instrument(skip_all)]
    async fn verify(&self, token: &str) -> Result<Option<UserId>, RepositoryError> {
        let digest = hash_token(token);
        if let Some(user_id) = self.cache.get(&digest).await {
            return Ok(Some(user_id));
        }

        let row: Option<(UserId,)> = sqlx::query_as(
            r"
            SELECT user_id
            FROM merkato.access_token
            WHERE token_digest = $1
              AND (expires_at IS NULL OR expires_at > NOW())
            ",
        )
        .bind(&digest)
        .fetch_optional(&self.pool)
        .await?;

        let user_id = row.map(|(user_id,)| user_id);
        if let Some(user_id) = user_id {
            self.cache.insert(digest, user_id).await;
        } else {
            debug!("Unknown or expired token");
        }
        Ok(user_id)
    }
}

/// Verifies tokens from a fixed list (`MERKATO_DEV_TOKENS`).
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenVerifier {
    tokens: HashMap<Vec<u8>, UserId>,
}

impl MemoryTokenVerifier {
    /// Create a verifier that accepts no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `user_id`.
    #[must_use]
    pub fn with_token(mut self, token: &str, user_id: UserId) -> Self {
        self.tokens.insert(hash_token(token), user_id);
        self
    }

    /// Build from configured dev tokens.
    #[must_use]
    pub fn from_dev_tokens(dev_tokens: &[DevToken]) -> Self {
        use secrecy::ExposeSecret;

        dev_tokens.iter().fold(Self::new(), |verifier, dev| {
            verifier.with_token(dev.token.expose_secret(), dev.user_id)
        })
    }
}

#[async_trait]
impl TokenVerifier for MemoryTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Option<UserId>, RepositoryError> {
        Ok(self.tokens.get(&hash_token(token)).copied())
    }
}

/// Repository for issuing and revoking access tokens.
pub struct AccessTokenRepository<'a> {
    pool: &'a PgPool,
}

impl<'a> AccessTokenRepository<'a> {
    /// Create a new access token repository.
    #[must_use]
    pub const fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Issue a new token for `user_id` and return it.
    ///
    /// The raw token is only ever returned here; the table keeps the digest.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Database` if the insert fails.
    /// Returns `RepositoryError::Conflict` in the astronomically unlikely
    /// case of a digest collision.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn issue(
        &self,
        user_id: UserId,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String, RepositoryError> {
        let token = generate_token();

        sqlx::query::<sqlx::Postgres>(
            r"
            INSERT INTO merkato.access_token (token_digest, user_id, expires_at)
            VALUES ($1, $2, $3)
            ",
        )
        .bind(hash_token(&token))
        .bind(user_id)
        .bind(expires_at)
        .execute(self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict("token digest already exists".to_string())
            }
            other => RepositoryError::Database(other),
        })?;

        Ok(token)
    }

    /// Revoke a token.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the token does not exist.
    /// Returns `RepositoryError::Database` if the delete fails.
    #[instrument(skip_all)]
    pub async fn revoke(&self, token: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query::<sqlx::Postgres>(
            "DELETE FROM merkato.access_token WHERE token_digest = $1",
        )
        .bind(hash_token(token))
        .execute(self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }
}
