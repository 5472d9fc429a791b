//! HTTP middleware and extractors for the cart service.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layer (capture errors)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//!
//! Authentication is per-handler via the [`auth`] extractors.

pub mod auth;
pub mod request_id;

pub use auth::{OptionalUser, RequireUser};
pub use request_id::request_id_middleware;
