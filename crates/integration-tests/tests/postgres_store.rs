//! `PostgreSQL` cart store and token verification.
//!
//! Skipped unless `MERKATO_TEST_DATABASE_URL` points at a scratch database.
//! Each test works on owners derived from a time-based suffix so runs can share
//! one database.

use std::time::Duration;

use chrono::Utc;
use merkato_core::{
    AnonymousId, CartLine, CartLines, CartOwner, MergeStatus, ProductId, Quantity, QuantityPolicy,
    UserId,
};
use merkato_server::db::{
    AccessTokenRepository, CartStore, PgCartStore, PgTokenVerifier, RepositoryError,
    TokenVerifier, create_pool,
};
use secrecy::SecretString;
use sqlx::PgPool;

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("MERKATO_TEST_DATABASE_URL").ok()?;
    let pool = create_pool(&SecretString::from(url))
        .await
        .expect("Failed to connect to test database");
    sqlx::migrate!("../server/migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

fn unique_suffix() -> u32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock before epoch")
        .subsec_nanos();
    nanos % 1_000_000
}

fn lines(items: &[(&str, u32)]) -> CartLines {
    items
        .iter()
        .map(|(p, q)| {
            CartLine::new(
                ProductId::parse(p).expect("valid product"),
                Quantity::new(*q).expect("positive quantity"),
            )
        })
        .collect()
}

#[tokio::test]
async fn test_replace_and_read() {
    let Some(pool) = test_pool().await else { return };
    let store = PgCartStore::new(pool);
    let owner = CartOwner::Anonymous(
        AnonymousId::parse(&format!("pg-replace-{}", unique_suffix())).expect("valid id"),
    );

    store
        .replace(&owner, &lines(&[("A", 2), ("B", 1)]))
        .await
        .expect("replace");
    store.replace(&owner, &lines(&[("B", 3)])).await.expect("replace");

    let cart = store.get(&owner).await.expect("get").expect("cart exists");
    assert_eq!(cart.lines, lines(&[("B", 3)]));

    assert!(store.delete(&owner).await.expect("delete"));
    assert!(store.get(&owner).await.expect("get").is_none());
}

#[tokio::test]
async fn test_merge_is_transactional_and_idempotent() {
    let Some(pool) = test_pool().await else { return };
    let store = PgCartStore::new(pool);
    let suffix = unique_suffix();
    let anonymous_id = AnonymousId::parse(&format!("pg-merge-{suffix}")).expect("valid id");
    let user_id = UserId::new(i32::try_from(suffix).expect("fits") + 1_000_000);
    let policy = QuantityPolicy::unlimited();

    store
        .replace(&CartOwner::User(user_id), &lines(&[("A", 3), ("B", 1)]))
        .await
        .expect("replace user");
    store
        .replace(
            &CartOwner::Anonymous(anonymous_id.clone()),
            &lines(&[("A", 2), ("C", 4)]),
        )
        .await
        .expect("replace anonymous");

    let report = store
        .merge_anonymous(&anonymous_id, user_id, &policy)
        .await
        .expect("merge");
    assert_eq!(report.status, MergeStatus::Merged);
    assert_eq!(report.lines, lines(&[("A", 5), ("B", 1), ("C", 4)]));
    assert!(
        store
            .get(&CartOwner::Anonymous(anonymous_id.clone()))
            .await
            .expect("get")
            .is_none()
    );

    let again = store
        .merge_anonymous(&anonymous_id, user_id, &policy)
        .await
        .expect("merge");
    assert_eq!(again.status, MergeStatus::NoOp);
    assert_eq!(again.lines, lines(&[("A", 5), ("B", 1), ("C", 4)]));

    store
        .delete(&CartOwner::User(user_id))
        .await
        .expect("cleanup");
}

#[tokio::test]
async fn test_concurrent_merges_apply_once() {
    let Some(pool) = test_pool().await else { return };
    let store = PgCartStore::new(pool);
    let suffix = unique_suffix();
    let anonymous_id = AnonymousId::parse(&format!("pg-race-{suffix}")).expect("valid id");
    let user_id = UserId::new(i32::try_from(suffix).expect("fits") + 2_000_000);
    let policy = QuantityPolicy::unlimited();

    store
        .replace(&CartOwner::Anonymous(anonymous_id.clone()), &lines(&[("A", 2)]))
        .await
        .expect("replace anonymous");

    let (first, second) = tokio::join!(
        store.merge_anonymous(&anonymous_id, user_id, &policy),
        store.merge_anonymous(&anonymous_id, user_id, &policy),
    );
    let statuses = [
        first.expect("merge").status,
        second.expect("merge").status,
    ];
    assert!(statuses.contains(&MergeStatus::Merged));
    assert!(statuses.contains(&MergeStatus::NoOp));

    let cart = store
        .get(&CartOwner::User(user_id))
        .await
        .expect("get")
        .expect("user cart exists");
    assert_eq!(cart.lines, lines(&[("A", 2)]));

    store
        .delete(&CartOwner::User(user_id))
        .await
        .expect("cleanup");
}

#[tokio::test]
async fn test_issued_token_verifies_until_revoked() {
    let Some(pool) = test_pool().await else { return };
    let user_id = UserId::new(i32::try_from(unique_suffix()).expect("fits") + 3_000_000);
    let repo = AccessTokenRepository::new(&pool);

    let token = repo.issue(user_id, None).await.expect("issue");

    let verifier = PgTokenVerifier::new(pool.clone(), Duration::from_secs(60));
    assert_eq!(verifier.verify(&token).await.expect("verify"), Some(user_id));
    assert_eq!(verifier.verify("not-a-token").await.expect("verify"), None);

    repo.revoke(&token).await.expect("revoke");
    assert!(matches!(
        repo.revoke(&token).await,
        Err(RepositoryError::NotFound)
    ));

    // Hits are cached for the TTL; a fresh verifier sees the revocation
    let fresh = PgTokenVerifier::new(pool, Duration::from_secs(60));
    assert_eq!(fresh.verify(&token).await.expect("verify"), None);
}

#[tokio::test]
async fn test_expired_token_is_rejected() {
    let Some(pool) = test_pool().await else { return };
    let user_id = UserId::new(i32::try_from(unique_suffix()).expect("fits") + 4_000_000);
    let repo = AccessTokenRepository::new(&pool);

    let expired = Utc::now() - chrono::Duration::hours(1);
    let token = repo.issue(user_id, Some(expired)).await.expect("issue");

    let verifier = PgTokenVerifier::new(pool, Duration::from_secs(60));
    assert_eq!(verifier.verify(&token).await.expect("verify"), None);
}
