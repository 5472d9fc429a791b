//! In-process cart store.
//!
//! Backs `MERKATO_STORE=memory` and the handler tests. A single mutex guards
//! every cart, so a merge is trivially atomic.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use merkato_core::{
    AnonymousId, Cart, CartLines, CartOwner, MergeReport, QuantityPolicy, UserId, merge_lines,
};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{CartStore, RepositoryError};

/// Cart store held in process memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryCartStore {
    carts: Mutex<HashMap<CartOwner, Cart>>,
}

impl MemoryCartStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored carts.
    pub async fn len(&self) -> usize {
        self.carts.lock().await.len()
    }

    /// Whether no carts are stored.
    pub async fn is_empty(&self) -> bool {
        self.carts.lock().await.is_empty()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn get(&self, owner: &CartOwner) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.carts.lock().await.get(owner).cloned())
    }

    #[instrument(skip(self, lines), fields(owner = %owner, lines = lines.len()))]
    async fn replace(&self, owner: &CartOwner, lines: &CartLines) -> Result<Cart, RepositoryError> {
        let cart = Cart::new(owner.clone(), lines.clone());
        self.carts.lock().await.insert(owner.clone(), cart.clone());
        Ok(cart)
    }

    #[instrument(skip(self, policy), fields(user_id = %user_id))]
    async fn merge_anonymous(
        &self,
        anonymous_id: &AnonymousId,
        user_id: UserId,
        policy: &QuantityPolicy,
    ) -> Result<MergeReport, RepositoryError> {
        let user = CartOwner::User(user_id);
        let mut carts = self.carts.lock().await;

        let source = carts.remove(&CartOwner::Anonymous(anonymous_id.clone()));
        let target_lines = carts
            .get(&user)
            .map(|cart| cart.lines.clone())
            .unwrap_or_default();

        let Some(source) = source.filter(|cart| !cart.lines.is_empty()) else {
            debug!("No anonymous cart to merge");
            return Ok(MergeReport::noop(target_lines));
        };

        let merged = merge_lines(&target_lines, &source.lines, policy);
        carts.insert(
            user.clone(),
            Cart {
                owner: user,
                lines: merged.lines.clone(),
                updated_at: Utc::now(),
            },
        );
        drop(carts);

        debug!(clamped = merged.clamped.len(), "Merged anonymous cart");
        Ok(MergeReport::merged(merged))
    }

    async fn delete(&self, owner: &CartOwner) -> Result<bool, RepositoryError> {
        Ok(self.carts.lock().await.remove(owner).is_some())
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use merkato_core::{CartLine, MergeStatus, ProductId, Quantity};

    use super::*;

    fn lines(items: &[(&str, u32)]) -> CartLines {
        items
            .iter()
            .map(|(p, q)| CartLine::new(ProductId::parse(p).unwrap(), Quantity::new(*q).unwrap()))
            .collect()
    }

    fn anonymous(id: &str) -> CartOwner {
        CartOwner::Anonymous(AnonymousId::parse(id).unwrap())
    }

    #[tokio::test]
    async fn test_replace_overwrites() {
        let store = MemoryCartStore::new();
        let owner = anonymous("anon1");

        store.replace(&owner, &lines(&[("A", 1), ("B", 2)])).await.unwrap();
        store.replace(&owner, &lines(&[("C", 3)])).await.unwrap();

        let cart = store.get(&owner).await.unwrap().unwrap();
        assert_eq!(cart.lines, lines(&[("C", 3)]));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_merge_sums_and_deletes_source() {
        let store = MemoryCartStore::new();
        let user = CartOwner::User(UserId::new(7));
        store.replace(&user, &lines(&[("A", 3), ("B", 1)])).await.unwrap();
        store.replace(&anonymous("anon1"), &lines(&[("A", 2)])).await.unwrap();

        let report = store
            .merge_anonymous(
                &AnonymousId::parse("anon1").unwrap(),
                UserId::new(7),
                &QuantityPolicy::unlimited(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, MergeStatus::Merged);
        assert_eq!(report.lines, lines(&[("A", 5), ("B", 1)]));
        assert!(store.get(&anonymous("anon1")).await.unwrap().is_none());
        assert_eq!(
            store.get(&user).await.unwrap().unwrap().lines,
            lines(&[("A", 5), ("B", 1)])
        );
    }

    #[tokio::test]
    async fn test_repeat_merge_is_noop() {
        let store = MemoryCartStore::new();
        store.replace(&anonymous("anon1"), &lines(&[("A", 2)])).await.unwrap();
        let anonymous_id = AnonymousId::parse("anon1").unwrap();
        let policy = QuantityPolicy::unlimited();

        let first = store
            .merge_anonymous(&anonymous_id, UserId::new(1), &policy)
            .await
            .unwrap();
        let second = store
            .merge_anonymous(&anonymous_id, UserId::new(1), &policy)
            .await
            .unwrap();

        assert_eq!(first.status, MergeStatus::Merged);
        assert_eq!(second.status, MergeStatus::NoOp);
        assert_eq!(second.lines, lines(&[("A", 2)]));
    }

    #[tokio::test]
    async fn test_empty_anonymous_cart_is_noop_and_removed() {
        let store = MemoryCartStore::new();
        store.replace(&anonymous("anon1"), &CartLines::new()).await.unwrap();

        let report = store
            .merge_anonymous(
                &AnonymousId::parse("anon1").unwrap(),
                UserId::new(1),
                &QuantityPolicy::unlimited(),
            )
            .await
            .unwrap();

        assert_eq!(report.status, MergeStatus::NoOp);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_merge_clamps_and_reports_partial() {
        let store = MemoryCartStore::new();
        store.replace(&CartOwner::User(UserId::new(1)), &lines(&[("A", 4)])).await.unwrap();
        store.replace(&anonymous("anon1"), &lines(&[("A", 4), ("B", 1)])).await.unwrap();

        let report = store
            .merge_anonymous(
                &AnonymousId::parse("anon1").unwrap(),
                UserId::new(1),
                &QuantityPolicy::with_max(Quantity::new(5).unwrap()),
            )
            .await
            .unwrap();

        assert_eq!(report.status, MergeStatus::Partial);
        assert_eq!(report.lines, lines(&[("A", 5), ("B", 1)]));
        assert_eq!(report.clamped.len(), 1);
        assert_eq!(report.clamped[0].requested.get(), 8);
        assert_eq!(report.clamped[0].applied.get(), 5);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = MemoryCartStore::new();
        let owner = anonymous("anon1");
        store.replace(&owner, &lines(&[("A", 1)])).await.unwrap();

        assert!(store.delete(&owner).await.unwrap());
        assert!(!store.delete(&owner).await.unwrap());
    }
}
