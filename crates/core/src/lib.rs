//! Merkato Core - Shared cart types library.
//!
//! This crate provides the types shared by every Merkato component:
//! - `merkato-cart-client` - Anonymous identity, cart sync and login merge
//! - `merkato-server` - HTTP cart service
//! - `merkato-cli` - Migrations and access token management
//!
//! # Architecture
//!
//! The core crate contains only types and pure functions - no I/O, no database
//! access, no HTTP clients. The cart merge rules live here so the client,
//! the server and the tests all agree on them.
//!
//! # Modules
//!
//! - [`types`] - Newtype wrappers for ids, quantities, cart lines and owners
//! - [`merge`] - Union/sum/clamp merge of two carts

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod merge;
pub mod types;

pub use merge::{ClampedLine, MergeReport, MergeStatus, MergedLines, QuantityPolicy, merge_lines};
pub use types::*;
