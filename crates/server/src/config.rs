//! Cart service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `MERKATO_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`). Only required for the `postgres` store.
//!
//! ## Optional
//! - `MERKATO_STORE` - `postgres` (default) or `memory`
//! - `MERKATO_HOST` - Bind address (default: 127.0.0.1)
//! - `MERKATO_PORT` - Listen port (default: 3000)
//! - `MERKATO_MAX_LINE_QUANTITY` - Per-line quantity cap (default: none)
//! - `MERKATO_DEV_TOKENS` - `token:user_id,...` pairs accepted by the memory store
//! - `MERKATO_TOKEN_CACHE_TTL_SECS` - How long verified tokens are cached (default: 60)
//! - `MERKATO_LOG_FORMAT` - `pretty` (default) or `json`
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//! - `SENTRY_SAMPLE_RATE` - Error sample rate (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Transaction sample rate (default: 0.0)

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use merkato_core::{Quantity, QuantityPolicy, UserId};
use secrecy::SecretString;
use thiserror::Error;

/// Shortest dev token accepted; anything shorter is trivially guessable.
const MIN_DEV_TOKEN_LENGTH: usize = 16;

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Where carts and access tokens live.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// `PostgreSQL` via `sqlx`.
    Postgres {
        /// Connection URL (contains password)
        database_url: SecretString,
    },
    /// Process memory. Carts are lost on restart.
    Memory {
        /// Bearer tokens accepted in this mode
        dev_tokens: Vec<DevToken>,
    },
}

/// A fixed bearer token for the memory store.
///
/// Implements `Debug` manually to redact the token.
#[derive(Clone)]
pub struct DevToken {
    /// Raw bearer token
    pub token: SecretString,
    /// User the token authenticates
    pub user_id: UserId,
}

impl std::fmt::Debug for DevToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevToken")
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected 'pretty' or 'json', got '{other}'")),
        }
    }
}

/// Cart service configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Storage backend
    pub store: StoreConfig,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Per-line quantity cap applied on replace and merge
    pub max_line_quantity: Option<Quantity>,
    /// How long a verified token is trusted without asking the store again
    pub token_cache_ttl: Duration,
    /// Log output format
    pub log_format: LogFormat,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
    /// Sentry transaction sample rate
    pub sentry_traces_sample_rate: f32,
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let store = match get_env_or_default("MERKATO_STORE", "postgres")
            .to_ascii_lowercase()
            .as_str()
        {
            "postgres" => {
                if get_optional_env("MERKATO_DEV_TOKENS").is_some() {
                    return Err(ConfigError::InvalidEnvVar(
                        "MERKATO_DEV_TOKENS".to_string(),
                        "only supported with MERKATO_STORE=memory".to_string(),
                    ));
                }
                StoreConfig::Postgres {
                    database_url: get_database_url("MERKATO_DATABASE_URL")?,
                }
            }
            "memory" => StoreConfig::Memory {
                dev_tokens: get_optional_env("MERKATO_DEV_TOKENS")
                    .map(|raw| parse_dev_tokens(&raw))
                    .transpose()?
                    .unwrap_or_default(),
            },
            other => {
                return Err(ConfigError::InvalidEnvVar(
                    "MERKATO_STORE".to_string(),
                    format!("expected 'postgres' or 'memory', got '{other}'"),
                ));
            }
        };

        let host = parse_env("MERKATO_HOST", "127.0.0.1")?;
        let port = parse_env("MERKATO_PORT", "3000")?;
        let max_line_quantity = get_optional_env("MERKATO_MAX_LINE_QUANTITY")
            .map(|raw| parse_max_line_quantity(&raw))
            .transpose()?;
        let token_cache_ttl = Duration::from_secs(parse_env("MERKATO_TOKEN_CACHE_TTL_SECS", "60")?);
        let log_format = parse_env("MERKATO_LOG_FORMAT", "pretty")?;

        Ok(Self {
            store,
            host,
            port,
            max_line_quantity,
            token_cache_ttl,
            log_format,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: parse_env("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: parse_env("SENTRY_TRACES_SAMPLE_RATE", "0.0")?,
        })
    }

    /// Configuration for an in-memory service, used by tests and local demos.
    #[must_use]
    pub fn in_memory(dev_tokens: Vec<DevToken>) -> Self {
        Self {
            store: StoreConfig::Memory { dev_tokens },
            host: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            max_line_quantity: None,
            token_cache_ttl: Duration::from_secs(60),
            log_format: LogFormat::Pretty,
            sentry_dsn: None,
            sentry_environment: None,
            sentry_sample_rate: 1.0,
            sentry_traces_sample_rate: 0.0,
        }
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Quantity policy derived from `max_line_quantity`.
    #[must_use]
    pub const fn quantity_policy(&self) -> QuantityPolicy {
        match self.max_line_quantity {
            Some(max) => QuantityPolicy::with_max(max),
            None => QuantityPolicy::unlimited(),
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable. Empty values count as unset.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_env<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse `MERKATO_MAX_LINE_QUANTITY`; must be a positive integer.
fn parse_max_line_quantity(raw: &str) -> Result<Quantity, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .and_then(Quantity::new)
        .ok_or_else(|| {
            ConfigError::InvalidEnvVar(
                "MERKATO_MAX_LINE_QUANTITY".to_string(),
                format!("expected a positive integer, got '{raw}'"),
            )
        })
}

/// Parse `token:user_id` pairs separated by commas.
fn parse_dev_tokens(raw: &str) -> Result<Vec<DevToken>, ConfigError> {
    const KEY: &str = "MERKATO_DEV_TOKENS";

    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (token, user_id) = pair.rsplit_once(':').ok_or_else(|| {
                ConfigError::InvalidEnvVar(KEY.to_string(), "expected 'token:user_id'".to_string())
            })?;
            if token.len() < MIN_DEV_TOKEN_LENGTH {
                return Err(ConfigError::InsecureSecret(
                    KEY.to_string(),
                    format!("tokens must be at least {MIN_DEV_TOKEN_LENGTH} characters"),
                ));
            }
            let user_id = user_id.trim().parse::<i32>().map_err(|e| {
                ConfigError::InvalidEnvVar(KEY.to_string(), format!("invalid user id: {e}"))
            })?;
            Ok(DevToken {
                token: SecretString::from(token.to_string()),
                user_id: UserId::new(user_id),
            })
        })
        .collect()
}
