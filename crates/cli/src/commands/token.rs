//! Access token management.
//!
//! # Usage
//!
//! ```bash
//! # Issue a token for user 42, valid for 30 days
//! merkato-cli token issue --user-id 42 --ttl-days 30
//!
//! # Revoke a token
//! merkato-cli token revoke --token <TOKEN>
//! ```
//!
//! Only the SHA-256 digest of a token is stored; the token itself is printed
//! once at issue time.

use chrono::{Duration, Utc};
use merkato_core::UserId;
use merkato_server::db::AccessTokenRepository;

use super::{CommandError, connect};

/// Issue a token for `user_id`, optionally expiring after `ttl_days`.
///
/// # Errors
///
/// Returns an error if `ttl_days` is not positive or the insert fails.
pub async fn issue(user_id: i32, ttl_days: Option<i64>) -> Result<String, CommandError> {
    let expires_at = ttl_days
        .map(|days| {
            if days <= 0 {
                return Err(CommandError::InvalidArgument(format!(
                    "--ttl-days must be positive, got {days}"
                )));
            }
            Duration::try_days(days)
                .and_then(|ttl| Utc::now().checked_add_signed(ttl))
                .ok_or_else(|| {
                    CommandError::InvalidArgument(format!("--ttl-days out of range: {days}"))
                })
        })
        .transpose()?;

    let pool = connect().await?;
    let token = AccessTokenRepository::new(&pool)
        .issue(UserId::new(user_id), expires_at)
        .await?;

    match expires_at {
        Some(at) => tracing::info!("Token issued for user {user_id}, expires {at}"),
        None => tracing::info!("Token issued for user {user_id}, never expires"),
    }
    Ok(token)
}

/// Revoke a token.
///
/// # Errors
///
/// Returns an error if the token does not exist or the delete fails.
pub async fn revoke(token: &str) -> Result<(), CommandError> {
    let pool = connect().await?;
    AccessTokenRepository::new(&pool).revoke(token).await?;

    tracing::info!("Token revoked");
    Ok(())
}
