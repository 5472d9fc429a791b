//! Line quantity type.

use core::fmt;
use core::num::NonZeroU32;

use serde::{Deserialize, Serialize};

use super::cart::CartError;

/// Quantity of a single cart line.
///
/// Always a positive integer. Arithmetic saturates at `u32::MAX` instead of
/// wrapping so merges can never produce a zero or negative quantity.
///
/// ## Examples
///
/// ```
/// use merkato_core::Quantity;
///
/// assert_eq!(Quantity::new(3).map(Quantity::get), Some(3));
/// assert!(Quantity::new(0).is_none());
///
/// // Missing or nonsensical input falls back to one
/// assert_eq!(Quantity::or_default(None), Quantity::ONE);
/// assert_eq!(Quantity::or_default(Some(-4)), Quantity::ONE);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(NonZeroU32);

impl Quantity {
    /// A quantity of one.
    pub const ONE: Self = Self(NonZeroU32::MIN);

    /// Largest representable quantity.
    pub const MAX: Self = Self(NonZeroU32::MAX);

    /// Create a quantity, returning `None` for zero.
    #[must_use]
    pub const fn new(n: u32) -> Option<Self> {
        match NonZeroU32::new(n) {
            Some(n) => Some(Self(n)),
            None => None,
        }
    }

    /// Interpret loosely-typed client input.
    ///
    /// Missing values and values below one default to one; values beyond
    /// `u32::MAX` saturate.
    #[must_use]
    pub fn or_default(n: Option<i64>) -> Self {
        match n {
            Some(n) if n >= 1 => u32::try_from(n)
                .ok()
                .and_then(Self::new)
                .unwrap_or(Self::MAX),
            _ => Self::ONE,
        }
    }

    /// Get the underlying value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.get()
    }

    /// Add two quantities, saturating at [`Quantity::MAX`].
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0.get()))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for Quantity {
    type Error = CartError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n).ok_or(CartError::ZeroQuantity)
    }
}

impl From<Quantity> for u32 {
    fn from(q: Quantity) -> Self {
        q.get()
    }
}

impl TryFrom<i32> for Quantity {
    type Error = CartError;

    fn try_from(n: i32) -> Result<Self, Self::Error> {
        u32::try_from(n)
            .ok()
            .and_then(Self::new)
            .ok_or(CartError::ZeroQuantity)
    }
}
