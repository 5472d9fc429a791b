//! HTTP route handlers for the cart service.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                 - Liveness check
//! GET  /health/ready           - Readiness check (store reachable)
//!
//! # Cart (JSON)
//! GET  /api/cart               - Read cart (bearer or ?anonymousId=)
//! PUT  /api/cart               - Replace cart (bearer or anonymousId in body)
//! POST /api/cart/merge         - Merge anonymous cart into user cart (bearer required)
//! ```

pub mod cart;
pub mod health;

use axum::{
    Router,
    extract::{FromRequest, FromRequestParts},
    routing::{get, post},
};

use crate::error::AppError;
use crate::state::AppState;

/// JSON body extractor that rejects with [`AppError::BadRequest`].
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Query string extractor that rejects with [`AppError::BadRequest`].
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

/// Create the health check router.
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness))
}

/// Create the cart API router.
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/api/cart", get(cart::show).put(cart::replace))
        .route("/api/cart/merge", post(cart::merge))
}

/// Create the main application router.
pub fn routes() -> Router<AppState> {
    Router::new().merge(health_routes()).merge(cart_routes())
}
