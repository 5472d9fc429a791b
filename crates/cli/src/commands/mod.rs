//! Subcommand implementations.

pub mod migrate;
pub mod token;

use secrecy::SecretString;
use sqlx::PgPool;
use thiserror::Error;

/// Errors shared by the database-backed commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Repository operation failed.
    #[error("{0}")]
    Repository(#[from] merkato_server::db::RepositoryError),

    /// Invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Read `MERKATO_DATABASE_URL`, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, CommandError> {
    dotenvy::dotenv().ok();

    std::env::var("MERKATO_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| CommandError::MissingEnvVar("MERKATO_DATABASE_URL"))
}

/// Connect to the cart database.
async fn connect() -> Result<PgPool, CommandError> {
    let url = database_url()?;
    tracing::info!("Connecting to cart database...");
    Ok(merkato_server::db::create_pool(&url).await?)
}
