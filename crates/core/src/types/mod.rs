//! Core types for Merkato.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod id;
pub mod identity;
pub mod quantity;

pub use cart::{Cart, CartError, CartLine, CartLines, CartOwner};
pub use id::*;
pub use identity::AnonymousIdentity;
pub use quantity::Quantity;
