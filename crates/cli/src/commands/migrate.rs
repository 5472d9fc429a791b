//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! merkato-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `MERKATO_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Stored in `crates/server/migrations/` and embedded at compile time.

use super::{CommandError, connect};

/// Run the cart service migrations.
///
/// # Errors
///
/// Returns an error if the database is unreachable or a migration fails.
pub async fn run() -> Result<(), CommandError> {
    let pool = connect().await?;

    tracing::info!("Running cart service migrations...");
    sqlx::migrate!("../server/migrations").run(&pool).await?;

    tracing::info!("Migrations complete!");
    Ok(())
}
