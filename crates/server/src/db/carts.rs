//! `PostgreSQL` cart store.
//!
//! Uses runtime queries (`query_as` + `FromRow`) so the crate builds without
//! a live database or an offline query cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use merkato_core::{
    AnonymousId, Cart, CartId, CartLine, CartLines, CartOwner, MergeReport, ProductId, Quantity,
    QuantityPolicy, UserId, merge_lines,
};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, instrument};

use super::{CartStore, RepositoryError};

/// Cart store backed by the `merkato.cart` and `merkato.cart_line` tables.
#[derive(Debug, Clone)]
pub struct PgCartStore {
    pool: PgPool,
}

impl PgCartStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Internal row type for the cart header.
#[derive(sqlx::FromRow)]
struct CartRow {
    id: CartId,
    updated_at: DateTime<Utc>,
}

/// Internal row type for cart lines.
#[derive(sqlx::FromRow)]
struct LineRow {
    product_id: String,
    quantity: i64,
}

impl TryFrom<LineRow> for CartLine {
    type Error = RepositoryError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let product_id = ProductId::parse(&row.product_id).map_err(|e| {
            RepositoryError::DataCorruption(format!("invalid product id in database: {e}"))
        })?;
        let quantity = u32::try_from(row.quantity)
            .ok()
            .and_then(Quantity::new)
            .ok_or_else(|| {
                RepositoryError::DataCorruption(format!(
                    "invalid quantity in database: {}",
                    row.quantity
                ))
            })?;
        Ok(Self::new(product_id, quantity))
    }
}

/// Find the cart of `owner`, optionally locking the row until commit.
async fn find_cart(
    conn: &mut PgConnection,
    owner: &CartOwner,
    for_update: bool,
) -> Result<Option<CartRow>, RepositoryError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let row = match owner {
        CartOwner::User(user_id) => {
            sqlx::query_as::<_, CartRow>(&format!(
                "SELECT id, updated_at FROM merkato.cart WHERE user_id = $1{lock}"
            ))
            .bind(*user_id)
            .fetch_optional(&mut *conn)
            .await?
        }
        CartOwner::Anonymous(anonymous_id) => {
            sqlx::query_as::<_, CartRow>(&format!(
                "SELECT id, updated_at FROM merkato.cart WHERE anonymous_id = $1{lock}"
            ))
            .bind(anonymous_id)
            .fetch_optional(&mut *conn)
            .await?
        }
    };
    Ok(row)
}

/// Create the cart of `owner` or bump its `updated_at`. The row stays locked
/// until the transaction ends.
async fn upsert_cart(conn: &mut PgConnection, owner: &CartOwner) -> Result<CartRow, RepositoryError> {
    let row = match owner {
        CartOwner::User(user_id) => {
            sqlx::query_as::<_, CartRow>(
                r"
                INSERT INTO merkato.cart (user_id)
                VALUES ($1)
                ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
                RETURNING id, updated_at
                ",
            )
            .bind(*user_id)
            .fetch_one(&mut *conn)
            .await?
        }
        CartOwner::Anonymous(anonymous_id) => {
            sqlx::query_as::<_, CartRow>(
                r"
                INSERT INTO merkato.cart (anonymous_id)
                VALUES ($1)
                ON CONFLICT (anonymous_id) DO UPDATE SET updated_at = NOW()
                RETURNING id, updated_at
                ",
            )
            .bind(anonymous_id)
            .fetch_one(&mut *conn)
            .await?
        }
    };
    Ok(row)
}

async fn load_lines(conn: &mut PgConnection, cart_id: CartId) -> Result<CartLines, RepositoryError> {
    let rows = sqlx::query_as::<_, LineRow>(
        r"
        SELECT product_id, quantity
        FROM merkato.cart_line
        WHERE cart_id = $1
        ORDER BY product_id
        ",
    )
    .bind(cart_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut lines = CartLines::new();
    for row in rows {
        lines.add(CartLine::try_from(row)?);
    }
    Ok(lines)
}

async fn write_lines(
    conn: &mut PgConnection,
    cart_id: CartId,
    lines: &CartLines,
) -> Result<(), RepositoryError> {
    sqlx::query::<sqlx::Postgres>("DELETE FROM merkato.cart_line WHERE cart_id = $1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;

    if lines.is_empty() {
        return Ok(());
    }

    let (products, quantities): (Vec<String>, Vec<i64>) = lines
        .iter()
        .map(|line| {
            (
                line.product_id.into_inner(),
                i64::from(line.quantity.get()),
            )
        })
        .unzip();

    sqlx::query::<sqlx::Postgres>(
        r"
        INSERT INTO merkato.cart_line (cart_id, product_id, quantity)
        SELECT $1, product_id, quantity
        FROM UNNEST($2::text[], $3::bigint[]) AS input (product_id, quantity)
        ",
    )
    .bind(cart_id)
    .bind(products)
    .bind(quantities)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn delete_cart(conn: &mut PgConnection, cart_id: CartId) -> Result<(), RepositoryError> {
    sqlx::query::<sqlx::Postgres>("DELETE FROM merkato.cart WHERE id = $1")
        .bind(cart_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl CartStore for PgCartStore {
    #[instrument(skip(self), fields(owner = %owner))]
    async fn get(&self, owner: &CartOwner) -> Result<Option<Cart>, RepositoryError> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = find_cart(&mut conn, owner, false).await? else {
            return Ok(None);
        };
        let lines = load_lines(&mut conn, row.id).await?;

        Ok(Some(Cart {
            owner: owner.clone(),
            lines,
            updated_at: row.updated_at,
        }))
    }

    #[instrument(skip(self, lines), fields(owner = %owner, lines = lines.len()))]
    async fn replace(&self, owner: &CartOwner, lines: &CartLines) -> Result<Cart, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        let row = upsert_cart(&mut tx, owner).await?;
        write_lines(&mut tx, row.id, lines).await?;
        tx.commit().await?;

        debug!(cart_id = %row.id, "Replaced cart");
        Ok(Cart {
            owner: owner.clone(),
            lines: lines.clone(),
            updated_at: row.updated_at,
        })
    }

    #[instrument(skip(self, policy), fields(user_id = %user_id))]
    async fn merge_anonymous(
        &self,
        anonymous_id: &AnonymousId,
        user_id: UserId,
        policy: &QuantityPolicy,
    ) -> Result<MergeReport, RepositoryError> {
        let anonymous = CartOwner::Anonymous(anonymous_id.clone());
        let user = CartOwner::User(user_id);
        let mut tx = self.pool.begin().await?;

        let Some(source) = find_cart(&mut tx, &anonymous, true).await? else {
            let target = match find_cart(&mut tx, &user, false).await? {
                Some(row) => load_lines(&mut tx, row.id).await?,
                None => CartLines::new(),
            };
            tx.commit().await?;
            debug!("No anonymous cart to merge");
            return Ok(MergeReport::noop(target));
        };

        let source_lines = load_lines(&mut tx, source.id).await?;
        if source_lines.is_empty() {
            delete_cart(&mut tx, source.id).await?;
            let target = match find_cart(&mut tx, &user, false).await? {
                Some(row) => load_lines(&mut tx, row.id).await?,
                None => CartLines::new(),
            };
            tx.commit().await?;
            debug!("Anonymous cart was empty, deleted");
            return Ok(MergeReport::noop(target));
        }

        let target = upsert_cart(&mut tx, &user).await?;
        let target_lines = load_lines(&mut tx, target.id).await?;
        let merged = merge_lines(&target_lines, &source_lines, policy);

        write_lines(&mut tx, target.id, &merged.lines).await?;
        delete_cart(&mut tx, source.id).await?;
        tx.commit().await?;

        debug!(
            source_cart_id = %source.id,
            target_cart_id = %target.id,
            clamped = merged.clamped.len(),
            "Merged anonymous cart"
        );
        Ok(MergeReport::merged(merged))
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn delete(&self, owner: &CartOwner) -> Result<bool, RepositoryError> {
        let result = match owner {
            CartOwner::User(user_id) => {
                sqlx::query::<sqlx::Postgres>("DELETE FROM merkato.cart WHERE user_id = $1")
                    .bind(*user_id)
                    .execute(&self.pool)
                    .await?
            }
            CartOwner::Anonymous(anonymous_id) => {
                sqlx::query::<sqlx::Postgres>("DELETE FROM merkato.cart WHERE anonymous_id = $1")
                    .bind(anonymous_id)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query::<sqlx::Postgres>("SELECT 1")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
