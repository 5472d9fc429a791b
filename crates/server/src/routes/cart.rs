//! Cart API handlers.
//!
//! A cart is keyed by the bearer token's user when one is sent, otherwise by
//! the client's anonymous id. Writes are whole-cart replaces, so a client may
//! resend the same cart any number of times.

use axum::{Json, extract::State};
use chrono::{DateTime, Utc};
use merkato_core::{AnonymousId, Cart, CartLines, CartOwner, MergeReport, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{ApiJson, ApiQuery};
use crate::error::{AppError, Result};
use crate::middleware::{OptionalUser, RequireUser};
use crate::state::AppState;

/// Body of `PUT /api/cart`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceCartRequest {
    /// New cart contents. Duplicate products are summed.
    #[serde(default)]
    pub items: CartLines,
    /// Anonymous key, used when no bearer token is sent.
    #[serde(default)]
    pub anonymous_id: Option<AnonymousId>,
}

/// Query of `GET /api/cart`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartQuery {
    /// Anonymous key, used when no bearer token is sent.
    pub anonymous_id: Option<AnonymousId>,
}

/// Body of `POST /api/cart/merge`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeCartRequest {
    /// Anonymous cart to fold into the caller's cart.
    pub anonymous_id: AnonymousId,
}

/// Cart as returned to clients.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CartResponse {
    /// Stored lines.
    pub items: CartLines,
    /// Last write; `null` when the cart does not exist yet.
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<Cart> for CartResponse {
    fn from(cart: Cart) -> Self {
        Self {
            items: cart.lines,
            updated_at: Some(cart.updated_at),
        }
    }
}

/// Pick the cart key: the authenticated user wins over the anonymous id.
fn cart_owner(user: Option<UserId>, anonymous_id: Option<AnonymousId>) -> Result<CartOwner> {
    match (user, anonymous_id) {
        (Some(user_id), _) => Ok(CartOwner::User(user_id)),
        (None, Some(anonymous_id)) => Ok(CartOwner::Anonymous(anonymous_id)),
        (None, None) => Err(AppError::BadRequest(
            "a bearer token or anonymousId is required".to_string(),
        )),
    }
}

/// Read a cart. A cart that does not exist reads as empty.
#[instrument(skip_all)]
pub async fn show(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    ApiQuery(query): ApiQuery<CartQuery>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(user, query.anonymous_id)?;
    let cart = state.carts().get(&owner).await?;
    Ok(Json(cart.map(CartResponse::from).unwrap_or_default()))
}

/// Replace a cart with the given lines, clamped to the quantity policy.
#[instrument(skip_all)]
pub async fn replace(
    State(state): State<AppState>,
    OptionalUser(user): OptionalUser,
    ApiJson(request): ApiJson<ReplaceCartRequest>,
) -> Result<Json<CartResponse>> {
    let owner = cart_owner(user, request.anonymous_id)?;

    let enforced = state.policy().enforce(&request.items);
    if !enforced.clamped.is_empty() {
        info!(
            owner = %owner,
            clamped = enforced.clamped.len(),
            "Clamped cart lines to the quantity cap"
        );
    }

    let cart = state.carts().replace(&owner, &enforced.lines).await?;
    Ok(Json(cart.into()))
}

/// Merge the anonymous cart into the caller's cart.
///
/// Idempotent: the anonymous cart is deleted by a successful merge, so a
/// repeat reports `noop`.
#[instrument(skip_all)]
pub async fn merge(
    State(state): State<AppState>,
    RequireUser(user_id): RequireUser,
    ApiJson(request): ApiJson<MergeCartRequest>,
) -> Result<Json<MergeReport>> {
    let report = state
        .carts()
        .merge_anonymous(&request.anonymous_id, user_id, state.policy())
        .await?;

    info!(
        user_id = %user_id,
        status = ?report.status,
        lines = report.lines.len(),
        clamped = report.clamped.len(),
        "Cart merge"
    );
    Ok(Json(report))
}
