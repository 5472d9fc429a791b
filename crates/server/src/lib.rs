//! Merkato cart service library.
//!
//! Owns server-side carts: whole-cart replace, read, and the atomic
//! anonymous → user merge performed at login. Exposed as a library so the
//! router can be driven in-process by tests.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

use std::time::Duration;

use axum::Router;
use axum::http::{Request, Response};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::state::AppState;

/// Build the application router with tracing and request IDs.
///
/// Sentry layers are added by the binary, outermost.
pub fn app(state: AppState) -> Router {
    routes::routes()
        .layer(axum::middleware::from_fn(middleware::request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
                    span.record("status", response.status().as_u16());
                    span.record(
                        "latency_ms",
                        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    );
                    DefaultOnResponse::default().on_response(response, latency, span);
                }),
        )
        .with_state(state)
}
