//! Bearer token extractors.
//!
//! Cart endpoints accept anonymous and authenticated callers alike, so most
//! handlers take [`OptionalUser`]. A token that is present but not accepted is
//! always a 401, never a silent downgrade to anonymous.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use merkato_core::UserId;

use crate::error::{AppError, set_sentry_user};
use crate::state::AppState;

/// Extractor for the authenticated user, if a bearer token was sent.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(OptionalUser(user): OptionalUser) -> String {
///     match user {
///         Some(id) => format!("user {id}"),
///         None => "anonymous".to_string(),
///     }
/// }
/// ```
pub struct OptionalUser(pub Option<UserId>);

/// Extractor that requires a valid bearer token.
pub struct RequireUser(pub UserId);

/// Pull the bearer token out of the `Authorization` header.
///
/// Returns `Ok(None)` when the header is absent and an error when it is
/// present but not a usable bearer token.
fn bearer_token(parts: &Parts) -> Result<Option<&str>, AppError> {
    let Some(value) = parts.headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let token = value
        .to_str()
        .ok()
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("malformed authorization header".to_string()))?;

    Ok(Some(token))
}

impl FromRequestParts<AppState> for OptionalUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts)? else {
            return Ok(Self(None));
        };

        let user_id = state
            .tokens()
            .verify(token)
            .await?
            .ok_or_else(|| AppError::Unauthorized("invalid or expired token".to_string()))?;

        tracing::Span::current().record("user_id", user_id.as_i32());
        set_sentry_user(&user_id);

        Ok(Self(Some(user_id)))
    }
}

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let OptionalUser(user) = OptionalUser::from_request_parts(parts, state).await?;
        user.map(Self)
            .ok_or_else(|| AppError::Unauthorized("missing bearer token".to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::http::Request;
    use merkato_core::QuantityPolicy;

    use super::*;
    use crate::db::{MemoryCartStore, MemoryTokenVerifier};

    fn state() -> AppState {
        AppState::new(
            Arc::new(MemoryCartStore::new()),
            Arc::new(MemoryTokenVerifier::new().with_token("good-token", UserId::new(3))),
            QuantityPolicy::unlimited(),
        )
    }

    fn parts(authorization: Option<&str>) -> Parts {
        let mut builder = Request::builder().uri("/api/cart");
        if let Some(value) = authorization {
            builder = builder.header(AUTHORIZATION, value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_no_header_is_anonymous() {
        let OptionalUser(user) = OptionalUser::from_request_parts(&mut parts(None), &state())
            .await
            .unwrap();
        assert_eq!(user, None);
    }

    #[tokio::test]
    async fn test_valid_token_resolves_user() {
        let OptionalUser(user) =
            OptionalUser::from_request_parts(&mut parts(Some("Bearer good-token")), &state())
                .await
                .unwrap();
        assert_eq!(user, Some(UserId::new(3)));
    }

    #[tokio::test]
    async fn test_rejected_token_is_unauthorized() {
        let result =
            OptionalUser::from_request_parts(&mut parts(Some("Bearer nope")), &state()).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_malformed_header_is_unauthorized() {
        for header in ["Basic abc", "Bearer ", "good-token"] {
            let result =
                OptionalUser::from_request_parts(&mut parts(Some(header)), &state()).await;
            assert!(matches!(result, Err(AppError::Unauthorized(_))), "{header}");
        }
    }

    #[tokio::test]
    async fn test_require_user_without_token() {
        let result = RequireUser::from_request_parts(&mut parts(None), &state()).await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }
}
