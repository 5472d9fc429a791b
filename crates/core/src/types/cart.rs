//! Cart lines, owners and carts.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::id::{AnonymousId, IdError, ProductId, UserId};
use super::quantity::Quantity;

/// Errors that can occur when building cart values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CartError {
    /// A quantity of zero (or below) was supplied where a line quantity was expected.
    #[error("quantity must be at least 1")]
    ZeroQuantity,
    /// The product reference is not a valid product id.
    #[error("invalid product id: {0}")]
    InvalidProduct(#[from] IdError),
}

/// A single cart line: one product and how many of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartLine {
    /// Product being bought.
    #[serde(rename = "product")]
    pub product_id: ProductId,
    /// How many units.
    pub quantity: Quantity,
}

impl CartLine {
    /// Create a new cart line.
    #[must_use]
    pub const fn new(product_id: ProductId, quantity: Quantity) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// The lines of one cart, at most one per product.
///
/// Lines are kept sorted by product id so serialized carts are stable, which
/// makes replace-style syncs idempotent byte-for-byte. Building from a list
/// that mentions a product more than once sums the quantities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CartLine>", into = "Vec<CartLine>")]
pub struct CartLines(BTreeMap<ProductId, Quantity>);

impl CartLines {
    /// Create an empty set of lines.
    #[must_use]
    pub const fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a line, summing with any existing line for the same product.
    pub fn add(&mut self, line: CartLine) {
        match self.0.entry(line.product_id) {
            Entry::Occupied(mut existing) => {
                let summed = existing.get().saturating_add(line.quantity);
                existing.insert(summed);
            }
            Entry::Vacant(slot) => {
                slot.insert(line.quantity);
            }
        }
    }

    /// Quantity of a product, if present.
    #[must_use]
    pub fn get(&self, product_id: &ProductId) -> Option<Quantity> {
        self.0.get(product_id).copied()
    }

    /// Number of distinct products.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the lines in product id order.
    pub fn iter(&self) -> impl Iterator<Item = CartLine> + '_ {
        self.0
            .iter()
            .map(|(product_id, quantity)| CartLine::new(product_id.clone(), *quantity))
    }

    /// Collect the lines into a vector in product id order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<CartLine> {
        self.iter().collect()
    }
}

impl FromIterator<CartLine> for CartLines {
    fn from_iter<I: IntoIterator<Item = CartLine>>(iter: I) -> Self {
        let mut lines = Self::new();
        for line in iter {
            lines.add(line);
        }
        lines
    }
}

impl From<Vec<CartLine>> for CartLines {
    fn from(lines: Vec<CartLine>) -> Self {
        lines.into_iter().collect()
    }
}

impl From<CartLines> for Vec<CartLine> {
    fn from(lines: CartLines) -> Self {
        lines
            .0
            .into_iter()
            .map(|(product_id, quantity)| CartLine::new(product_id, quantity))
            .collect()
    }
}

/// Key a server-side cart is stored under.
///
/// A cart belongs to exactly one owner: either an anonymous shopper or an
/// authenticated user, never both.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CartOwner {
    /// Cart of an unauthenticated visitor.
    Anonymous(AnonymousId),
    /// Cart of a logged-in user.
    User(UserId),
}

impl core::fmt::Display for CartOwner {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Anonymous(id) => write!(f, "anonymous:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// A stored cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    /// Who the cart belongs to.
    pub owner: CartOwner,
    /// Cart contents.
    #[serde(rename = "items")]
    pub lines: CartLines,
    /// When the cart was last written.
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// Create a cart stamped with the current time.
    #[must_use]
    pub fn new(owner: CartOwner, lines: CartLines) -> Self {
        Self {
            owner,
            lines,
            updated_at: Utc::now(),
        }
    }
}
