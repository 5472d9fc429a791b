//! Cart merge rules.
//!
//! When a shopper logs in, the cart they built anonymously is folded into
//! the cart of their account:
//!
//! - lines are unioned by product id
//! - when both carts hold the same product the quantities are summed
//! - every resulting quantity is clamped to the catalog maximum, if any
//!
//! Nothing is ever dropped. A clamped line is reported back so the caller can
//! tell the shopper, and the merge is then marked [`MergeStatus::Partial`].

use serde::{Deserialize, Serialize};

use crate::types::{CartLine, CartLines, ProductId, Quantity};

/// Upper bound applied to line quantities.
///
/// The catalog owns the real limit; this is the knob the service is
/// configured with. `None` means no cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuantityPolicy {
    max_line_quantity: Option<Quantity>,
}

impl QuantityPolicy {
    /// No cap on line quantities.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            max_line_quantity: None,
        }
    }

    /// Cap every line at `max`.
    #[must_use]
    pub const fn with_max(max: Quantity) -> Self {
        Self {
            max_line_quantity: Some(max),
        }
    }

    /// The configured cap.
    #[must_use]
    pub const fn max_line_quantity(&self) -> Option<Quantity> {
        self.max_line_quantity
    }

    /// Clamp a single quantity to the cap.
    #[must_use]
    pub fn clamp(&self, quantity: Quantity) -> Quantity {
        match self.max_line_quantity {
            Some(max) if quantity > max => max,
            _ => quantity,
        }
    }

    /// Clamp every line, reporting the ones that were reduced.
    #[must_use]
    pub fn enforce(&self, lines: &CartLines) -> MergedLines {
        let mut clamped = Vec::new();
        let lines = lines
            .iter()
            .map(|line| self.clamp_line(line, &mut clamped))
            .collect();
        MergedLines { lines, clamped }
    }

    fn clamp_line(&self, line: CartLine, clamped: &mut Vec<ClampedLine>) -> CartLine {
        let applied = self.clamp(line.quantity);
        if applied != line.quantity {
            clamped.push(ClampedLine {
                product_id: line.product_id.clone(),
                requested: line.quantity,
                applied,
            });
        }
        CartLine::new(line.product_id, applied)
    }
}

/// A line whose quantity was reduced to honor the [`QuantityPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClampedLine {
    /// Product whose quantity was reduced.
    #[serde(rename = "product")]
    pub product_id: ProductId,
    /// Quantity before clamping.
    pub requested: Quantity,
    /// Quantity stored.
    pub applied: Quantity,
}

/// Output of [`merge_lines`] and [`QuantityPolicy::enforce`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedLines {
    /// Resulting cart lines.
    pub lines: CartLines,
    /// Lines reduced by the policy, in product id order.
    pub clamped: Vec<ClampedLine>,
}

/// Merge `source` into `target`.
///
/// Sums quantities of products present in both, carries lines unique to either
/// side, then clamps to `policy`. The result never contains a zero quantity or
/// a duplicate product.
///
/// # Example
///
/// ```
/// use merkato_core::{CartLine, CartLines, ProductId, Quantity, QuantityPolicy, merge_lines};
///
/// let line = |p: &str, q: u32| CartLine::new(ProductId::parse(p).unwrap(), Quantity::new(q).unwrap());
/// let anonymous: CartLines = vec![line("A", 2)].into();
/// let account: CartLines = vec![line("A", 3), line("B", 1)].into();
///
/// let merged = merge_lines(&account, &anonymous, &QuantityPolicy::unlimited());
/// assert_eq!(merged.lines, vec![line("A", 5), line("B", 1)].into());
/// assert!(merged.clamped.is_empty());
/// ```
#[must_use]
pub fn merge_lines(target: &CartLines, source: &CartLines, policy: &QuantityPolicy) -> MergedLines {
    let combined: CartLines = target.iter().chain(source.iter()).collect();
    policy.enforce(&combined)
}

/// How a login merge ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    /// The anonymous cart was folded in and deleted.
    Merged,
    /// There was no anonymous cart (or it was empty); nothing changed.
    #[serde(rename = "noop")]
    NoOp,
    /// Merged, but some quantities were clamped. See [`MergeReport::clamped`].
    Partial,
}

/// Result of a login merge as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeReport {
    /// Outcome.
    pub status: MergeStatus,
    /// The authenticated user's cart after the merge.
    #[serde(rename = "items")]
    pub lines: CartLines,
    /// Lines reduced by the quantity policy.
    #[serde(default)]
    pub clamped: Vec<ClampedLine>,
}

impl MergeReport {
    /// Report for a merge that found nothing to merge.
    #[must_use]
    pub const fn noop(lines: CartLines) -> Self {
        Self {
            status: MergeStatus::NoOp,
            lines,
            clamped: Vec::new(),
        }
    }

    /// Report for a completed merge.
    #[must_use]
    pub fn merged(merged: MergedLines) -> Self {
        let status = if merged.clamped.is_empty() {
            MergeStatus::Merged
        } else {
            MergeStatus::Partial
        };
        Self {
            status,
            lines: merged.lines,
            clamped: merged.clamped,
        }
    }
}
